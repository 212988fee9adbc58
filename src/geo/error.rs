use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum GeoError {
    InvalidCoordinate(String),
}

impl Display for GeoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GeoError::InvalidCoordinate(reason) => {
                write!(f, "invalid coordinate: {}", reason)
            }
        }
    }
}

impl std::error::Error for GeoError {}
