//! Device session: the single owner of the vendor driver.
//!
//! The session walks the device through
//! `Disconnected -> Connected -> Profiled -> Configured -> Armed -> Captured`.
//! Reconfiguration in place is not supported, a new profile or arena needs a
//! disconnect followed by the full setup sequence. Driver failures never
//! escape as raw strings, they are tagged with the kind of operation that
//! failed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use ndarray::{s, Array2, Array3};

use crate::capture::{ImageSlice, ImageVolume, SignalsCapture};
use crate::driver::{ArenaAxis, DeviceState, Driver, DriverError};
use crate::error::{AcquisitionError, Result};
use crate::profile::{Arena, AxisRange, CoordinateSystem, Filter, Profile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Profiled(Profile),
    /// Arena written, scan not started yet.
    Configured(Profile),
    Armed(Profile),
    /// At least one trigger since the scan started.
    Captured(Profile),
}

impl SessionState {
    pub fn profile(self) -> Option<Profile> {
        match self {
            SessionState::Disconnected | SessionState::Connected => None,
            SessionState::Profiled(p)
            | SessionState::Configured(p)
            | SessionState::Armed(p)
            | SessionState::Captured(p) => Some(p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOptions {
    /// Give up once calibration has been running this long.
    pub timeout: Duration,
    /// Pause between two status polls.
    pub poll_interval: Duration,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub struct DeviceSession<D: Driver> {
    driver: D,
    state: SessionState,
}

fn connection_error(err: DriverError) -> AcquisitionError {
    AcquisitionError::Connection(err.0)
}

fn config_error(err: DriverError) -> AcquisitionError {
    AcquisitionError::Config(err.0)
}

fn no_data_error(err: DriverError) -> AcquisitionError {
    AcquisitionError::NoData(err.0)
}

impl<D: Driver> DeviceSession<D> {
    /// Initialises the SDK. The session starts disconnected.
    pub fn new(mut driver: D) -> Result<Self> {
        driver.initialize().map_err(connection_error)?;
        info!("Radar API initialised");
        Ok(Self {
            driver,
            state: SessionState::Disconnected,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.profile()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(AcquisitionError::Connection(
                "the device is already connected".to_string(),
            ));
        }
        info!("Connecting to the device...");
        self.driver.connect_any().map_err(|e| {
            warn!("Failed to connect to the device: {e}");
            connection_error(e)
        })?;
        self.state = SessionState::Connected;
        info!("Connected to the device");
        Ok(())
    }

    /// Stops the scan and closes the connection. The connection is closed
    /// even when stopping fails, the first failure is returned. The session
    /// only stays connected when closing the connection itself fails.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(AcquisitionError::not_connected());
        }
        info!("Disconnecting from the device...");
        let stopped = self.driver.stop();
        if let Err(e) = &stopped {
            warn!("Failed to stop the scan: {e}");
        }
        let disconnected = self.driver.disconnect();
        if disconnected.is_ok() {
            self.state = SessionState::Disconnected;
        }
        if let Err(e) = stopped.and(disconnected) {
            warn!("Failed to disconnect from the device: {e}");
            return Err(connection_error(e));
        }
        info!("Disconnected from the device");
        Ok(())
    }

    /// Drops the session back to `Disconnected` whatever the driver
    /// reports, after a best-effort disconnect.
    pub fn abandon(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                warn!("Connection abandoned after failed disconnect: {e}");
            }
        }
        self.state = SessionState::Disconnected;
    }

    pub fn set_profile(&mut self, profile: Profile) -> Result<()> {
        match self.state {
            SessionState::Disconnected => return Err(AcquisitionError::not_connected()),
            SessionState::Connected => {}
            _ => {
                return Err(AcquisitionError::Config(
                    "the profile is already set, reconnect to change it".to_string(),
                ))
            }
        }
        self.driver
            .set_profile(profile.code())
            .map_err(config_error)?;
        self.state = SessionState::Profiled(profile);
        debug!("Profile set to {profile}");
        Ok(())
    }

    pub fn set_arena_cartesian(
        &mut self,
        x: AxisRange,
        y: AxisRange,
        z: AxisRange,
        threshold: f64,
        filter: Filter,
    ) -> Result<()> {
        self.write_arena(CoordinateSystem::Cartesian, [x, y, z], threshold, filter)
    }

    pub fn set_arena_spherical(
        &mut self,
        r: AxisRange,
        theta: AxisRange,
        phi: AxisRange,
        threshold: f64,
        filter: Filter,
    ) -> Result<()> {
        self.write_arena(
            CoordinateSystem::Spherical,
            [r, theta, phi],
            threshold,
            filter,
        )
    }

    /// Writes the arena in whichever coordinate system the profile uses.
    pub fn set_arena(&mut self, arena: &Arena) -> Result<()> {
        let [a, b, c] = arena.axes;
        match self.state.profile().map(Profile::coordinates) {
            Some(CoordinateSystem::Spherical) => {
                self.set_arena_spherical(a, b, c, arena.threshold, arena.filter)
            }
            _ => self.set_arena_cartesian(a, b, c, arena.threshold, arena.filter),
        }
    }

    fn write_arena(
        &mut self,
        coordinates: CoordinateSystem,
        axes: [AxisRange; 3],
        threshold: f64,
        filter: Filter,
    ) -> Result<()> {
        let profile = match self.state {
            SessionState::Disconnected => return Err(AcquisitionError::not_connected()),
            SessionState::Profiled(profile) => profile,
            SessionState::Connected => {
                return Err(AcquisitionError::Config(
                    "set the profile before the arena".to_string(),
                ))
            }
            _ => {
                return Err(AcquisitionError::Config(
                    "the arena is already set, reconnect to change it".to_string(),
                ))
            }
        };
        if profile.coordinates() != coordinates {
            return Err(AcquisitionError::Config(format!(
                "profile {profile} needs a {:?} arena",
                profile.coordinates()
            )));
        }
        for (axis, range) in ArenaAxis::for_coordinates(coordinates)
            .into_iter()
            .zip(axes)
        {
            self.driver.set_arena(axis, range).map_err(config_error)?;
            debug!("Arena {axis}: {range}");
        }
        self.driver.set_threshold(threshold).map_err(config_error)?;
        self.driver
            .set_dynamic_image_filter(filter)
            .map_err(config_error)?;
        self.state = SessionState::Configured(profile);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        let profile = match self.state {
            SessionState::Disconnected => return Err(AcquisitionError::not_connected()),
            SessionState::Configured(profile) => profile,
            SessionState::Armed(_) | SessionState::Captured(_) => return Ok(()),
            _ => {
                return Err(AcquisitionError::Config(
                    "set the arena before starting the scan".to_string(),
                ))
            }
        };
        self.driver.start().map_err(config_error)?;
        self.state = SessionState::Armed(profile);
        info!("Scan started with profile {profile}");
        Ok(())
    }

    fn require_started(&self) -> Result<Profile> {
        match self.state {
            SessionState::Disconnected => Err(AcquisitionError::not_connected()),
            SessionState::Armed(profile) | SessionState::Captured(profile) => Ok(profile),
            _ => Err(AcquisitionError::Config(
                "the scan has not been started".to_string(),
            )),
        }
    }

    fn require_capture(&self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => Err(AcquisitionError::not_connected()),
            SessionState::Captured(_) => Ok(()),
            _ => Err(AcquisitionError::NoData(
                "trigger the device before reading data".to_string(),
            )),
        }
    }

    /// Requests one capture from the device.
    pub fn trigger(&mut self) -> Result<()> {
        let profile = self.require_started()?;
        self.driver.trigger().map_err(connection_error)?;
        self.state = SessionState::Captured(profile);
        debug!("Triggered");
        Ok(())
    }

    /// Runs the built-in calibration. The device needs manual triggers while
    /// calibrating, so this triggers until the device reports completion,
    /// the cancel flag is raised or the timeout elapses.
    pub fn calibrate<F>(
        &mut self,
        options: &CalibrationOptions,
        cancel: &AtomicBool,
        mut on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(f64),
    {
        let profile = self.require_started()?;
        self.driver.start_calibration().map_err(connection_error)?;
        info!("Calibration started");

        let started = Instant::now();
        let mut progress = 0.0;
        loop {
            let status = self.driver.status().map_err(connection_error)?;
            if status.state != DeviceState::Calibrating {
                break;
            }
            progress = status.progress_percent;
            on_progress(progress);
            debug!("Calibrating: {progress:.0}%");

            if cancel.load(Ordering::Relaxed) {
                warn!("Calibration cancelled at {progress:.0}%");
                return Err(AcquisitionError::CalibrationCancelled { progress });
            }
            if started.elapsed() >= options.timeout {
                warn!("Calibration timed out at {progress:.0}%");
                return Err(AcquisitionError::CalibrationTimeout(options.timeout));
            }

            self.driver.trigger().map_err(connection_error)?;
            self.state = SessionState::Captured(profile);
            if !options.poll_interval.is_zero() {
                thread::sleep(options.poll_interval);
            }
        }
        on_progress(100.0);
        info!(
            "Calibration finished in {:.1}s (last reported {progress:.0}%)",
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// Time vector plus one amplitude column per antenna pair.
    pub fn read_signals(&mut self) -> Result<SignalsCapture> {
        self.require_capture()?;
        let pairs = self.driver.antenna_pairs().map_err(no_data_error)?;
        let mut time = Vec::new();
        let mut amplitudes = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            let (signal, pair_time) = self.driver.signal(*pair).map_err(no_data_error)?;
            // Every pair shares the same time axis.
            if i == 0 {
                time = pair_time;
            }
            amplitudes.push(signal);
        }
        Ok(SignalsCapture {
            time,
            pairs,
            amplitudes,
        })
    }

    /// Slice as `(row = y, column = x)`.
    pub fn read_image_slice(&mut self) -> Result<ImageSlice> {
        self.require_capture()?;
        let raw = self.driver.raw_image_slice().map_err(no_data_error)?;
        let flat: Vec<f64> = raw.data.into_iter().flatten().collect();
        let by_x = Array2::from_shape_vec((raw.size_x, raw.size_y), flat).map_err(|e| {
            AcquisitionError::NoData(format!(
                "image slice does not match its {}x{} size: {e}",
                raw.size_x, raw.size_y
            ))
        })?;
        Ok(ImageSlice {
            data: by_x.reversed_axes().as_standard_layout().into_owned(),
        })
    }

    /// Width and height of the slice the current arena produces.
    pub fn image_dimensions(&mut self) -> Result<(usize, usize)> {
        let slice = self.read_image_slice()?;
        Ok((slice.width(), slice.height()))
    }

    /// Volume as depth layers, each layer `(row = x reversed, column = y)`.
    pub fn read_image_volume(&mut self) -> Result<ImageVolume> {
        self.require_capture()?;
        let raw = self.driver.raw_image().map_err(no_data_error)?;
        let flat: Vec<f64> = raw.data.into_iter().flatten().flatten().collect();
        let xyz = Array3::from_shape_vec((raw.size_x, raw.size_y, raw.size_z), flat).map_err(
            |e| {
                AcquisitionError::NoData(format!(
                    "image does not match its {}x{}x{} size: {e}",
                    raw.size_x, raw.size_y, raw.size_z
                ))
            },
        )?;
        let zxy = xyz.permuted_axes([2, 0, 1]);
        Ok(ImageVolume {
            data: zxy.slice(s![.., ..;-1, ..]).to_owned(),
        })
    }
}

impl<D: Driver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, SimulatedDriver};
    use crate::profile::default_arena;

    fn armed(profile: Profile) -> DeviceSession<SimulatedDriver> {
        let mut session = DeviceSession::new(SimulatedDriver::new()).unwrap();
        session.connect().unwrap();
        session.set_profile(profile).unwrap();
        session.set_arena(&default_arena(profile)).unwrap();
        session.start().unwrap();
        session
    }

    #[test]
    fn walks_the_setup_sequence() {
        let session = armed(Profile::ShortRangeImaging);
        assert_eq!(
            session.state(),
            SessionState::Armed(Profile::ShortRangeImaging)
        );
        assert_eq!(session.driver().count(DriverCall::SetThreshold), 1);
    }

    #[test]
    fn guards_operations_while_disconnected() {
        let mut session = DeviceSession::new(SimulatedDriver::new()).unwrap();
        let cancel = AtomicBool::new(false);
        assert!(session.trigger().is_err());
        assert!(session
            .calibrate(&CalibrationOptions::default(), &cancel, |_| {})
            .is_err());
        assert!(session.read_signals().is_err());
        assert!(session.disconnect().is_err());
        // None of the guarded calls reached the driver.
        assert_eq!(session.driver().journal(), &[DriverCall::Initialize]);
    }

    #[test]
    fn reads_need_a_trigger() {
        let mut session = armed(Profile::ShortRangeImaging);
        let err = session.read_image_slice().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoData);
        session.trigger().unwrap();
        assert!(session.read_image_slice().is_ok());
    }

    #[test]
    fn refuses_arena_for_the_wrong_coordinates() {
        let mut session = DeviceSession::new(SimulatedDriver::new()).unwrap();
        session.connect().unwrap();
        session.set_profile(Profile::Tracker).unwrap();
        let [x, y, z] = default_arena(Profile::ShortRangeImaging).axes;
        let err = session
            .set_arena_cartesian(x, y, z, 35.0, Filter::None)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn slice_is_transposed_to_rows_of_y() {
        let mut session = armed(Profile::ShortRangeImaging);
        session.trigger().unwrap();
        let slice = session.read_image_slice().unwrap();
        // X has 33 samples, Y has 41.
        assert_eq!((slice.width(), slice.height()), (33, 41));
        assert_eq!(session.image_dimensions().unwrap(), (33, 41));
    }

    #[test]
    fn volume_is_depth_major_with_rows_flipped() {
        let mut session = armed(Profile::ShortRangeImaging);
        session.trigger().unwrap();
        let raw = session.driver_mut().raw_image().unwrap();
        let volume = session.read_image_volume().unwrap();
        assert_eq!((volume.rows(), volume.columns(), volume.depth()), (33, 41, 21));
        let (x, y, z) = (2, 7, 5);
        assert_eq!(volume.data[[z, raw.size_x - 1 - x, y]], raw.data[x][y][z]);
    }

    #[test]
    fn signals_have_one_column_per_pair() {
        let mut session = armed(Profile::SensorNarrow);
        session.trigger().unwrap();
        let signals = session.read_signals().unwrap();
        assert_eq!(signals.amplitudes.len(), signals.pairs.len());
        assert_eq!(signals.time.len(), signals.amplitudes[0].len());
    }

    #[test]
    fn calibration_reports_progress_until_done() {
        let mut session = armed(Profile::SensorNarrow);
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();
        session
            .calibrate(&CalibrationOptions::default(), &cancel, |p| seen.push(p))
            .unwrap();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&100.0));
    }

    #[test]
    fn stalled_calibration_times_out() {
        let mut session = DeviceSession::new(SimulatedDriver::new().with_calibration_step(0.0))
            .unwrap();
        session.connect().unwrap();
        session.set_profile(Profile::Tracker).unwrap();
        session.set_arena(&default_arena(Profile::Tracker)).unwrap();
        session.start().unwrap();
        let options = CalibrationOptions {
            timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
        };
        let cancel = AtomicBool::new(false);
        let err = session.calibrate(&options, &cancel, |_| {}).unwrap_err();
        assert!(matches!(err, AcquisitionError::CalibrationTimeout(_)));
    }

    #[test]
    fn calibration_can_be_cancelled() {
        let mut session = armed(Profile::SensorNarrow);
        let cancel = AtomicBool::new(true);
        let err = session
            .calibrate(&CalibrationOptions::default(), &cancel, |_| {})
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::CalibrationCancelled { .. }));
    }

    #[test]
    fn failed_disconnect_keeps_the_session_connected() {
        let mut session = armed(Profile::ShortRangeImaging);
        session.driver_mut().fail_on(DriverCall::Disconnect);
        assert!(session.disconnect().is_err());
        assert!(session.is_connected());
        session.driver_mut().clear_failures();
        session.disconnect().unwrap();
        assert!(!session.is_connected());
    }

    #[test]
    fn failed_stop_still_closes_the_connection() {
        let mut session = armed(Profile::ShortRangeImaging);
        session.driver_mut().fail_on(DriverCall::Stop);
        let err = session.disconnect().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connection);
        assert_eq!(session.driver().count(DriverCall::Disconnect), 1);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn abandon_always_ends_disconnected() {
        let mut session = armed(Profile::ShortRangeImaging);
        session.driver_mut().fail_on(DriverCall::Stop);
        session.driver_mut().fail_on(DriverCall::Disconnect);
        session.abandon();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.driver().count(DriverCall::Disconnect), 1);
    }
}
