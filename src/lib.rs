#![doc = include_str!("../README.md")]

pub mod error;
pub mod geo;
pub mod optimize;
pub mod routing;
pub mod stabilize;
pub mod util;

#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use optimize::{OptimizerConfig, RouteOptimizer, TravelContext};
#[doc(inline)]
pub use routing::{OsrmClient, Profile, RoutePoint, RouteResult, RouteSource};
#[doc(inline)]
pub use stabilize::{LocationStabilizer, Movement, RawFix, StabilizedFix, StabilizerConfig};
