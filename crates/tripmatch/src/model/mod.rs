pub mod stop;
pub mod trip;

pub use stop::{Stop, TimePoint};
pub use trip::{TripRecord, TripStatus, VehicleFix};
