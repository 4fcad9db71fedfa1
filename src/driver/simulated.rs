//! An in-process stand-in for the vendor SDK.
//!
//! It enforces the same call ordering as the real device and synthesises a
//! deterministic target whose position drifts with every trigger, so the
//! preview and the saved files have something to show.
use std::collections::HashMap;
use std::f64::consts::PI;

use log::{debug, info};

use super::{
    AntennaPair, ArenaAxis, DeviceState, DeviceStatus, Driver, DriverError, DriverResult,
    RawImage, RawImageSlice,
};
use crate::profile::{AxisRange, CoordinateSystem, Filter, Profile};

/// Every SDK call the simulated driver has received, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    Initialize,
    ConnectAny,
    Disconnect,
    Stop,
    Start,
    SetProfile,
    SetArena(ArenaAxis),
    SetThreshold,
    SetFilter,
    Trigger,
    StartCalibration,
    Status,
    AntennaPairs,
    Signal,
    RawImageSlice,
    RawImage,
}

// The oldest half of the journal is dropped once it holds this many calls.
const JOURNAL_CAPACITY: usize = 4096;
const DEFAULT_SIGNAL_LENGTH: usize = 256;
const DEFAULT_CALIBRATION_STEP: f64 = 20.0;
// Time between two signal samples, in seconds.
const SAMPLE_PERIOD: f64 = 1.0e-10;

#[derive(Debug)]
pub struct SimulatedDriver {
    device_present: bool,
    failures: Vec<DriverCall>,
    journal: Vec<DriverCall>,
    connected: bool,
    profile: Option<Profile>,
    arena: HashMap<ArenaAxis, AxisRange>,
    threshold: f64,
    filter: Filter,
    scanning: bool,
    has_frame: bool,
    triggers: u64,
    calibration: Option<f64>,
    calibration_step: f64,
    signal_length: usize,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self {
            device_present: true,
            failures: Vec::new(),
            journal: Vec::new(),
            connected: false,
            profile: None,
            arena: HashMap::new(),
            threshold: 35.0,
            filter: Filter::None,
            scanning: false,
            has_frame: false,
            triggers: 0,
            calibration: None,
            calibration_step: DEFAULT_CALIBRATION_STEP,
            signal_length: DEFAULT_SIGNAL_LENGTH,
        }
    }

    /// Behaves as if no device is plugged in: `connect_any` always fails.
    pub fn without_device() -> Self {
        Self {
            device_present: false,
            ..Self::new()
        }
    }

    /// Makes every call of the given kind fail.
    pub fn failing_on(mut self, call: DriverCall) -> Self {
        self.failures.push(call);
        self
    }

    /// Calibration progress added per trigger. Zero never completes.
    pub fn with_calibration_step(mut self, percent: f64) -> Self {
        self.calibration_step = percent;
        self
    }

    pub fn with_signal_length(mut self, samples: usize) -> Self {
        self.signal_length = samples;
        self
    }

    /// Most recent calls, oldest first. Long sessions only keep the tail.
    pub fn journal(&self) -> &[DriverCall] {
        &self.journal
    }

    pub fn count(&self, call: DriverCall) -> usize {
        self.journal.iter().filter(|c| **c == call).count()
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn fail_on(&mut self, call: DriverCall) {
        self.failures.push(call);
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    fn record(&mut self, call: DriverCall) -> DriverResult<()> {
        if self.journal.len() >= JOURNAL_CAPACITY {
            self.journal.drain(..JOURNAL_CAPACITY / 2);
        }
        self.journal.push(call);
        if self.failures.contains(&call) {
            debug!("Simulated failure injected for {:?}", call);
            return Err(DriverError::new(format!(
                "WALABOT_SIMULATED_FAILURE: {:?} failed",
                call
            )));
        }
        Ok(())
    }

    fn require_connected(&self) -> DriverResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DriverError::new("WALABOT_NOT_CONNECTED"))
        }
    }

    fn require_frame(&self) -> DriverResult<()> {
        self.require_connected()?;
        if self.has_frame {
            Ok(())
        } else {
            Err(DriverError::new("WALABOT_NO_DATA: trigger the device first"))
        }
    }

    fn axes(&self) -> DriverResult<[AxisRange; 3]> {
        let profile = self
            .profile
            .ok_or_else(|| DriverError::new("WALABOT_PROFILE_NOT_SET"))?;
        let mut axes = Vec::with_capacity(3);
        for axis in ArenaAxis::for_coordinates(profile.coordinates()) {
            let range = self
                .arena
                .get(&axis)
                .copied()
                .ok_or_else(|| DriverError::new(format!("WALABOT_ARENA_NOT_SET: {axis}")))?;
            axes.push(range);
        }
        Ok([axes[0], axes[1], axes[2]])
    }

    // Target position as a fraction of each axis, drifting per trigger.
    fn target(&self) -> [f64; 3] {
        let phase = self.triggers as f64 * 0.35;
        [
            0.5 + 0.3 * phase.sin(),
            0.5 + 0.3 * (phase * 0.7).cos(),
            0.5 + 0.2 * (phase * 0.4).sin(),
        ]
    }

    fn intensity(&self, fractions: [f64; 3], dimensions: usize) -> f64 {
        let target = self.target();
        let sigma = 0.18;
        let distance: f64 = fractions
            .iter()
            .zip(target.iter())
            .take(dimensions)
            .map(|(f, t)| (f - t).powi(2))
            .sum();
        let gain = (self.threshold / 35.0).clamp(0.5, 1.5);
        (255.0 * (-distance / (2.0 * sigma * sigma)).exp() / gain)
            .round()
            .clamp(0.0, 255.0)
    }
}

fn fraction(index: usize, count: usize) -> f64 {
    if count <= 1 {
        0.5
    } else {
        index as f64 / (count - 1) as f64
    }
}

impl Driver for SimulatedDriver {
    fn initialize(&mut self) -> DriverResult<()> {
        self.record(DriverCall::Initialize)?;
        info!("Simulated radar SDK initialised");
        Ok(())
    }

    fn connect_any(&mut self) -> DriverResult<()> {
        self.record(DriverCall::ConnectAny)?;
        if !self.device_present {
            return Err(DriverError::new("WALABOT_INSTRUMENT_NOT_FOUND"));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> DriverResult<()> {
        self.record(DriverCall::Disconnect)?;
        self.connected = false;
        self.profile = None;
        self.arena.clear();
        self.scanning = false;
        self.has_frame = false;
        self.calibration = None;
        Ok(())
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.record(DriverCall::Stop)?;
        self.scanning = false;
        Ok(())
    }

    fn start(&mut self) -> DriverResult<()> {
        self.record(DriverCall::Start)?;
        self.require_connected()?;
        self.axes()?;
        self.scanning = true;
        Ok(())
    }

    fn set_profile(&mut self, code: u32) -> DriverResult<()> {
        self.record(DriverCall::SetProfile)?;
        self.require_connected()?;
        let profile = Profile::ALL
            .into_iter()
            .find(|p| p.code() == code)
            .ok_or_else(|| {
                DriverError::new(format!("WALABOT_INVALID_PROFILE: 0x{code:08X}"))
            })?;
        self.profile = Some(profile);
        self.arena.clear();
        Ok(())
    }

    fn set_arena(&mut self, axis: ArenaAxis, range: AxisRange) -> DriverResult<()> {
        self.record(DriverCall::SetArena(axis))?;
        self.require_connected()?;
        let profile = self
            .profile
            .ok_or_else(|| DriverError::new("WALABOT_PROFILE_NOT_SET"))?;
        if profile.coordinates() != axis.coordinates() {
            return Err(DriverError::new(format!(
                "WALABOT_WRONG_ARENA: axis {axis} is not used by profile {profile}"
            )));
        }
        if range.validate().is_err() {
            return Err(DriverError::new(format!(
                "WALABOT_INVALID_ARENA: {axis} {range}"
            )));
        }
        if axis == ArenaAxis::R && range.min < 1.0 {
            return Err(DriverError::new("WALABOT_INVALID_ARENA: R must start at 1 cm or more"));
        }
        self.arena.insert(axis, range);
        Ok(())
    }

    fn set_threshold(&mut self, threshold: f64) -> DriverResult<()> {
        self.record(DriverCall::SetThreshold)?;
        self.require_connected()?;
        if !(0.1..=100.0).contains(&threshold) {
            return Err(DriverError::new(format!(
                "WALABOT_INVALID_THRESHOLD: {threshold} is outside 0.1..100"
            )));
        }
        self.threshold = threshold;
        Ok(())
    }

    fn set_dynamic_image_filter(&mut self, filter: Filter) -> DriverResult<()> {
        self.record(DriverCall::SetFilter)?;
        self.require_connected()?;
        self.filter = filter;
        Ok(())
    }

    fn trigger(&mut self) -> DriverResult<()> {
        self.record(DriverCall::Trigger)?;
        self.require_connected()?;
        if !self.scanning {
            return Err(DriverError::new("WALABOT_NOT_STARTED"));
        }
        self.triggers += 1;
        self.has_frame = true;
        if let Some(progress) = self.calibration {
            let progress = progress + self.calibration_step;
            self.calibration = if progress >= 100.0 { None } else { Some(progress) };
        }
        Ok(())
    }

    fn start_calibration(&mut self) -> DriverResult<()> {
        self.record(DriverCall::StartCalibration)?;
        self.require_connected()?;
        if !self.scanning {
            return Err(DriverError::new("WALABOT_NOT_STARTED"));
        }
        self.calibration = Some(0.0);
        Ok(())
    }

    fn status(&mut self) -> DriverResult<DeviceStatus> {
        self.record(DriverCall::Status)?;
        let (state, progress_percent) = match (self.connected, self.calibration) {
            (false, _) => (DeviceState::Disconnected, 0.0),
            (true, Some(progress)) => (DeviceState::Calibrating, progress),
            (true, None) if self.scanning => (DeviceState::Scanning, 0.0),
            (true, None) if self.profile.is_some() => (DeviceState::Idle, 0.0),
            (true, None) => (DeviceState::Connected, 0.0),
        };
        Ok(DeviceStatus {
            state,
            progress_percent,
        })
    }

    fn antenna_pairs(&mut self) -> DriverResult<Vec<AntennaPair>> {
        self.record(DriverCall::AntennaPairs)?;
        self.require_connected()?;
        let pairs = match self.profile.map(Profile::coordinates) {
            Some(CoordinateSystem::Cartesian) => (1..=4)
                .flat_map(|tx| (5..=8).map(move |rx| AntennaPair { tx, rx }))
                .collect(),
            Some(CoordinateSystem::Spherical) => (1..=2)
                .flat_map(|tx| (3..=4).map(move |rx| AntennaPair { tx, rx }))
                .collect(),
            None => return Err(DriverError::new("WALABOT_PROFILE_NOT_SET")),
        };
        Ok(pairs)
    }

    fn signal(&mut self, pair: AntennaPair) -> DriverResult<(Vec<f64>, Vec<f64>)> {
        self.record(DriverCall::Signal)?;
        self.require_frame()?;
        if self.profile == Some(Profile::Tracker) {
            return Err(DriverError::new(
                "WALABOT_INVALID_OPERATION: raw signals are not available in the tracker profile",
            ));
        }
        let delay = 40.0 + 4.0 * f64::from(pair.tx + pair.rx) + self.triggers as f64;
        let time: Vec<f64> = (0..self.signal_length)
            .map(|i| i as f64 * SAMPLE_PERIOD)
            .collect();
        let amplitudes = (0..self.signal_length)
            .map(|i| {
                let t = i as f64 - delay;
                let envelope = (-(t * t) / 200.0).exp();
                envelope * (2.0 * PI * t / 12.0).cos() * 1.0e-3
            })
            .collect();
        Ok((amplitudes, time))
    }

    fn raw_image_slice(&mut self) -> DriverResult<RawImageSlice> {
        self.record(DriverCall::RawImageSlice)?;
        self.require_frame()?;
        let [first, second, third] = self.axes()?;
        let size_x = first.sample_count();
        let size_y = second.sample_count();
        let data = (0..size_x)
            .map(|x| {
                (0..size_y)
                    .map(|y| self.intensity([fraction(x, size_x), fraction(y, size_y), 0.5], 2))
                    .collect()
            })
            .collect();
        Ok(RawImageSlice {
            data,
            size_x,
            size_y,
            slice_depth: third.min + (third.max - third.min) * self.target()[2],
            power: 1.0,
        })
    }

    fn raw_image(&mut self) -> DriverResult<RawImage> {
        self.record(DriverCall::RawImage)?;
        self.require_frame()?;
        let [first, second, third] = self.axes()?;
        let (size_x, size_y, size_z) = (
            first.sample_count(),
            second.sample_count(),
            third.sample_count(),
        );
        let data = (0..size_x)
            .map(|x| {
                (0..size_y)
                    .map(|y| {
                        (0..size_z)
                            .map(|z| {
                                self.intensity(
                                    [
                                        fraction(x, size_x),
                                        fraction(y, size_y),
                                        fraction(z, size_z),
                                    ],
                                    3,
                                )
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Ok(RawImage {
            data,
            size_x,
            size_y,
            size_z,
            power: 1.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::default_arena;

    fn armed(profile: Profile) -> SimulatedDriver {
        let mut driver = SimulatedDriver::new();
        driver.initialize().unwrap();
        driver.connect_any().unwrap();
        driver.set_profile(profile.code()).unwrap();
        let arena = default_arena(profile);
        for (axis, range) in ArenaAxis::for_coordinates(profile.coordinates())
            .into_iter()
            .zip(arena.axes)
        {
            driver.set_arena(axis, range).unwrap();
        }
        driver.start().unwrap();
        driver
    }

    #[test]
    fn journal_keeps_only_recent_calls() {
        let mut driver = armed(Profile::ShortRangeImaging);
        for _ in 0..JOURNAL_CAPACITY * 2 {
            driver.trigger().unwrap();
        }
        assert!(driver.journal().len() <= JOURNAL_CAPACITY);
        assert_eq!(driver.journal().last(), Some(&DriverCall::Trigger));
        assert_eq!(driver.triggers(), (JOURNAL_CAPACITY * 2) as u64);
    }

    #[test]
    fn missing_device_refuses_connection() {
        let mut driver = SimulatedDriver::without_device();
        let err = driver.connect_any().unwrap_err();
        assert!(err.0.contains("NOT_FOUND"));
    }

    #[test]
    fn reads_require_a_trigger() {
        let mut driver = armed(Profile::ShortRangeImaging);
        assert!(driver.raw_image_slice().is_err());
        driver.trigger().unwrap();
        let slice = driver.raw_image_slice().unwrap();
        assert_eq!((slice.size_x, slice.size_y), (33, 41));
        assert!(slice
            .data
            .iter()
            .flatten()
            .all(|v| (0.0..=255.0).contains(v) && v.fract() == 0.0));
    }

    #[test]
    fn rejects_arena_for_the_wrong_coordinate_system() {
        let mut driver = SimulatedDriver::new();
        driver.connect_any().unwrap();
        driver.set_profile(Profile::Tracker.code()).unwrap();
        let range = AxisRange { min: 0.0, max: 1.0, step: 0.5 };
        assert!(driver.set_arena(ArenaAxis::X, range).is_err());
    }

    #[test]
    fn calibration_completes_after_enough_triggers() {
        let mut driver = armed(Profile::SensorNarrow).with_calibration_step(50.0);
        driver.start_calibration().unwrap();
        assert_eq!(driver.status().unwrap().state, DeviceState::Calibrating);
        driver.trigger().unwrap();
        assert_eq!(driver.status().unwrap().progress_percent, 50.0);
        driver.trigger().unwrap();
        assert_eq!(driver.status().unwrap().state, DeviceState::Scanning);
    }

    #[test]
    fn tracker_profile_has_no_raw_signals() {
        let mut driver = armed(Profile::Tracker);
        driver.trigger().unwrap();
        let pairs = driver.antenna_pairs().unwrap();
        assert!(driver.signal(pairs[0]).is_err());
    }

    #[test]
    fn injected_failures_are_journaled() {
        let mut driver = SimulatedDriver::new().failing_on(DriverCall::ConnectAny);
        assert!(driver.connect_any().is_err());
        assert_eq!(driver.count(DriverCall::ConnectAny), 1);
    }
}
