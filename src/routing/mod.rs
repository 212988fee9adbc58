//! Adapter boundary to the external road-routing API.
//!
//! The rest of the crate only sees [`RouteSource`]: "route between two
//! points or say you couldn't" and "snap a point to the road network or
//! say you couldn't". Every upstream failure mode is absorbed into
//! `None` on this side of the boundary.

#[doc(hidden)]
pub mod definition;
#[doc(hidden)]
pub mod osrm;


#[doc(inline)]
pub use definition::{Profile, RoutePoint, RouteResult, RouteSource};
#[doc(inline)]
pub use osrm::OsrmClient;
