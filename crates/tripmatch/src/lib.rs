//! Trip assembly and map-matching domain logic.

pub mod clean;
pub mod config;
pub mod error;
pub mod fleet;
pub mod geom;
pub mod locate;
pub mod matcher;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod stop_locks;

pub use clean::CleanVerdict;
pub use config::Config;
pub use error::*;
pub use fleet::FleetTracker;
pub use matcher::{MatchRequest, MatchResponse, MatchResult, MatchTrace};
pub use model::*;
pub use pipeline::Pipeline;
pub use provider::*;
