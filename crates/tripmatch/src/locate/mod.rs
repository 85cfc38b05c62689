//! Measures along the matched geometry, for fixes and for stops.

pub mod stops;
pub mod vehicles;

pub use stops::locate_stops;
pub use vehicles::locate_vehicles;
