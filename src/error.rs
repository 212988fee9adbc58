use std::fmt::{Display, Formatter};

use crate::geo::error::GeoError;
use crate::impl_err;

/// Top-level error for the tracking core. Invalid input is the only
/// failure callers ever see; upstream routing failures are absorbed
/// into degraded results before reaching this boundary.
#[derive(Debug)]
pub enum Error {
    Geo(GeoError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl_err!(GeoError, Geo);

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Geo(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {}
