//! Boundary to the vendor radar SDK.
//!
//! The SDK owns the transport, the firmware protocol and the image
//! reconstruction. This crate only sees the handful of calls below, each of
//! which either succeeds or fails with the SDK's error string.

mod simulated;

use std::fmt;

use thiserror::Error;

use crate::profile::{AxisRange, CoordinateSystem, Filter};

pub use simulated::{DriverCall, SimulatedDriver};

/// Error string reported by the SDK for a failed call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        DriverError(message.into())
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaAxis {
    X,
    Y,
    Z,
    R,
    Theta,
    Phi,
}

impl ArenaAxis {
    pub fn for_coordinates(coordinates: CoordinateSystem) -> [ArenaAxis; 3] {
        match coordinates {
            CoordinateSystem::Cartesian => [ArenaAxis::X, ArenaAxis::Y, ArenaAxis::Z],
            CoordinateSystem::Spherical => [ArenaAxis::R, ArenaAxis::Theta, ArenaAxis::Phi],
        }
    }

    pub fn coordinates(self) -> CoordinateSystem {
        match self {
            ArenaAxis::X | ArenaAxis::Y | ArenaAxis::Z => CoordinateSystem::Cartesian,
            ArenaAxis::R | ArenaAxis::Theta | ArenaAxis::Phi => CoordinateSystem::Spherical,
        }
    }
}

impl fmt::Display for ArenaAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArenaAxis::X => "X",
            ArenaAxis::Y => "Y",
            ArenaAxis::Z => "Z",
            ArenaAxis::R => "R",
            ArenaAxis::Theta => "Theta",
            ArenaAxis::Phi => "Phi",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AntennaPair {
    pub tx: u32,
    pub rx: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Connected,
    Idle,
    Scanning,
    Calibrating,
    Initialized,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceStatus {
    pub state: DeviceState,
    /// Only meaningful while `state == Calibrating`.
    pub progress_percent: f64,
}

/// Slice as the SDK returns it: `data[x][y]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImageSlice {
    pub data: Vec<Vec<f64>>,
    pub size_x: usize,
    pub size_y: usize,
    pub slice_depth: f64,
    pub power: f64,
}

/// Volume as the SDK returns it: `data[x][y][z]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    pub data: Vec<Vec<Vec<f64>>>,
    pub size_x: usize,
    pub size_y: usize,
    pub size_z: usize,
    pub power: f64,
}

/// Vendor SDK operations, in the order a session normally calls them.
pub trait Driver {
    /// Loads and initialises the SDK.
    fn initialize(&mut self) -> DriverResult<()>;
    /// Connects to the first device found.
    fn connect_any(&mut self) -> DriverResult<()>;
    fn disconnect(&mut self) -> DriverResult<()>;
    fn stop(&mut self) -> DriverResult<()>;
    fn start(&mut self) -> DriverResult<()>;
    fn set_profile(&mut self, code: u32) -> DriverResult<()>;
    fn set_arena(&mut self, axis: ArenaAxis, range: AxisRange) -> DriverResult<()>;
    fn set_threshold(&mut self, threshold: f64) -> DriverResult<()>;
    fn set_dynamic_image_filter(&mut self, filter: Filter) -> DriverResult<()>;
    fn trigger(&mut self) -> DriverResult<()>;
    fn start_calibration(&mut self) -> DriverResult<()>;
    fn status(&mut self) -> DriverResult<DeviceStatus>;
    fn antenna_pairs(&mut self) -> DriverResult<Vec<AntennaPair>>;
    /// Returns `(amplitudes, time_axis)` for one antenna pair.
    fn signal(&mut self, pair: AntennaPair) -> DriverResult<(Vec<f64>, Vec<f64>)>;
    fn raw_image_slice(&mut self) -> DriverResult<RawImageSlice>;
    fn raw_image(&mut self) -> DriverResult<RawImage>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_axes_follow_coordinate_system() {
        for axis in ArenaAxis::for_coordinates(CoordinateSystem::Spherical) {
            assert_eq!(axis.coordinates(), CoordinateSystem::Spherical);
        }
        assert_eq!(
            ArenaAxis::for_coordinates(CoordinateSystem::Cartesian),
            [ArenaAxis::X, ArenaAxis::Y, ArenaAxis::Z]
        );
    }
}
