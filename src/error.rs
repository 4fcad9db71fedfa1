//! Error types shared by the device session and the acquisition controller.
//!
//! Every driver failure is turned into an `AcquisitionError` that keeps the
//! vendor message and carries an `ErrorKind` tag, so the shell can show a
//! notification without knowing which operation failed.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Which family of settings fields failed to parse or validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFamily {
    Arena,
    Threshold,
}

impl fmt::Display for FieldFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldFamily::Arena => write!(f, "arena"),
            FieldFamily::Threshold => write!(f, "threshold"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Config,
    Field,
    Selection,
    NoData,
    Calibration,
    Storage,
}

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid {family} setting: {message}")]
    Field {
        family: FieldFamily,
        message: String,
    },

    #[error("No capture type selected")]
    Selection,

    #[error("No data available: {0}")]
    NoData(String),

    #[error("Calibration cancelled at {progress:.0}%")]
    CalibrationCancelled { progress: f64 },

    #[error("Calibration did not complete within {0:?}")]
    CalibrationTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Malformed capture file: {0}")]
    Parse(String),
}

impl AcquisitionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquisitionError::Connection(_) => ErrorKind::Connection,
            AcquisitionError::Config(_) => ErrorKind::Config,
            AcquisitionError::Field { .. } => ErrorKind::Field,
            AcquisitionError::Selection => ErrorKind::Selection,
            AcquisitionError::NoData(_) | AcquisitionError::Parse(_) => ErrorKind::NoData,
            AcquisitionError::CalibrationCancelled { .. }
            | AcquisitionError::CalibrationTimeout(_) => ErrorKind::Calibration,
            AcquisitionError::Io(_) | AcquisitionError::Csv(_) | AcquisitionError::Image(_) => {
                ErrorKind::Storage
            }
        }
    }

    pub(crate) fn field(family: FieldFamily, message: impl Into<String>) -> Self {
        AcquisitionError::Field {
            family,
            message: message.into(),
        }
    }

    pub(crate) fn not_connected() -> Self {
        AcquisitionError::Connection("the device is not connected".to_string())
    }
}
