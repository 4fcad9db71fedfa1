//! Acquisition controller: drives the device session through the
//! connect / configure / trigger / save lifecycle on behalf of the operator.
//!
//! The controller owns everything the operator can edit (profile, arena,
//! output naming, save selection) and pushes it into the session on connect.
//! Settings are never applied to a running device in place: a change while
//! connected is applied by disconnecting and replaying the setup sequence.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use log::{debug, error, info, warn};

use crate::capture::{CaptureKind, CaptureSelection, ImageSlice};
use crate::colormap::{render_preview, Palette, PreviewImage};
use crate::driver::Driver;
use crate::error::{AcquisitionError, FieldFamily, Result};
use crate::profile::{default_arena, Arena, AxisRange, CoordinateSystem, Filter, Profile};
use crate::session::{CalibrationOptions, DeviceSession};
use crate::storage::{self, OutputNaming};

/// Questions the controller asks before a save that could lose data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmPrompt {
    /// The current trigger has already been saved once.
    RepeatSave,
    /// These target files already exist.
    Overwrite(Vec<PathBuf>),
}

impl ConfirmPrompt {
    pub fn title(&self) -> &'static str {
        match self {
            ConfirmPrompt::RepeatSave => "Confirm save",
            ConfirmPrompt::Overwrite(_) => "File already exists",
        }
    }
}

impl fmt::Display for ConfirmPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmPrompt::RepeatSave => write!(
                f,
                "The current trigger is the same as the previous one. Do you want to continue saving?"
            ),
            ConfirmPrompt::Overwrite(paths) => {
                let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(
                    f,
                    "{} already exist(s). Would you like to overwrite?",
                    names.join(", ")
                )
            }
        }
    }
}

/// Yes/no answer source for `ConfirmPrompt`s.
pub trait Confirm {
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&ConfirmPrompt) -> bool,
{
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Counter value the files were named with.
    pub counter: u64,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(SaveReport),
    /// The operator answered no, nothing was written.
    Declined(ConfirmPrompt),
}

/// Text fields of the settings view. Values stay as typed until applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsForm {
    pub coordinates: CoordinateSystem,
    /// `[axis][min, max, step]`
    pub axes: [[String; 3]; 3],
    pub threshold: String,
    pub filter: Filter,
}

impl SettingsForm {
    /// Nine arena fields plus the threshold.
    pub const FIELD_COUNT: usize = 10;

    pub fn from_arena(coordinates: CoordinateSystem, arena: &Arena) -> Self {
        let axes = arena
            .axes
            .map(|axis| [axis.min, axis.max, axis.step].map(|v| v.to_string()));
        Self {
            coordinates,
            axes,
            threshold: arena.threshold.to_string(),
            filter: arena.filter,
        }
    }

    pub fn field(&self, index: usize) -> Option<&String> {
        match index {
            0..=8 => Some(&self.axes[index / 3][index % 3]),
            9 => Some(&self.threshold),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, index: usize) -> Option<&mut String> {
        match index {
            0..=8 => Some(&mut self.axes[index / 3][index % 3]),
            9 => Some(&mut self.threshold),
            _ => None,
        }
    }

    pub fn field_label(&self, index: usize) -> String {
        const PARTS: [&str; 3] = ["min", "max", "resolution"];
        match index {
            0..=8 => format!(
                "{} {}",
                self.coordinates.axis_labels()[index / 3],
                PARTS[index % 3]
            ),
            _ => "Threshold".to_string(),
        }
    }

    /// Parses every field. Arena fields are checked before the threshold.
    pub fn parse(&self) -> Result<Arena> {
        let mut values = [[0.0; 3]; 3];
        for (axis, fields) in self.axes.iter().enumerate() {
            for (part, text) in fields.iter().enumerate() {
                values[axis][part] = text.trim().parse::<f64>().map_err(|_| {
                    AcquisitionError::field(
                        FieldFamily::Arena,
                        format!("invalid arena size '{text}' entered"),
                    )
                })?;
            }
        }
        let mut axes = [AxisRange {
            min: 0.0,
            max: 0.0,
            step: 1.0,
        }; 3];
        for (range, [min, max, step]) in axes.iter_mut().zip(values) {
            *range = AxisRange::new(min, max, step)?;
        }

        let threshold = self.threshold.trim().parse::<f64>().map_err(|_| {
            AcquisitionError::field(
                FieldFamily::Threshold,
                format!("invalid threshold '{}' entered", self.threshold),
            )
        })?;
        let arena = Arena {
            axes,
            threshold,
            filter: self.filter,
        };
        arena.validate()?;
        Ok(arena)
    }
}

#[derive(Debug)]
pub struct AcquisitionController<D: Driver> {
    session: DeviceSession<D>,
    profile: Profile,
    arena: Arena,
    naming: OutputNaming,
    selection: CaptureSelection,
    capture_saved: bool,
    preview_enabled: bool,
    palette: Palette,
    preview: Option<PreviewImage>,
    settings_view: Option<SettingsForm>,
}

impl<D: Driver> AcquisitionController<D> {
    pub fn new(session: DeviceSession<D>, profile: Profile) -> Self {
        Self {
            session,
            profile,
            arena: default_arena(profile),
            naming: OutputNaming::default(),
            selection: CaptureSelection::default(),
            capture_saved: false,
            preview_enabled: false,
            palette: Palette::default(),
            preview: None,
            settings_view: None,
        }
    }

    pub fn with_naming(mut self, naming: OutputNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn session(&self) -> &DeviceSession<D> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DeviceSession<D> {
        &mut self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn naming(&self) -> &OutputNaming {
        &self.naming
    }

    pub fn counter(&self) -> u64 {
        self.naming.counter
    }

    pub fn set_counter(&mut self, counter: u64) {
        self.naming.counter = counter;
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.naming.prefix = prefix.into();
    }

    pub fn set_output_dir(&mut self, directory: impl Into<PathBuf>) {
        self.naming.directory = directory.into();
    }

    pub fn selection(&self) -> CaptureSelection {
        self.selection
    }

    pub fn selection_mut(&mut self) -> &mut CaptureSelection {
        &mut self.selection
    }

    pub fn capture_saved(&self) -> bool {
        self.capture_saved
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = palette;
    }

    pub fn preview_enabled(&self) -> bool {
        self.preview_enabled
    }

    /// When enabled, every trigger also reads and renders the image slice.
    pub fn set_preview(&mut self, enabled: bool) {
        self.preview_enabled = enabled;
        if !enabled {
            self.preview = None;
        }
    }

    pub fn preview(&self) -> Option<&PreviewImage> {
        self.preview.as_ref()
    }

    /// Opens the settings view, or returns the one already open.
    pub fn open_settings(&mut self) -> &mut SettingsForm {
        let coordinates = self.profile.coordinates();
        let arena = self.arena;
        self.settings_view
            .get_or_insert_with(|| SettingsForm::from_arena(coordinates, &arena))
    }

    pub fn settings_view(&self) -> Option<&SettingsForm> {
        self.settings_view.as_ref()
    }

    pub fn settings_view_mut(&mut self) -> Option<&mut SettingsForm> {
        self.settings_view.as_mut()
    }

    pub fn close_settings(&mut self) {
        self.settings_view = None;
    }

    /// Switches profile and resets the arena to the profile defaults. An
    /// open settings view is reopened for the new coordinate system and a
    /// connected device is reconnected with the new configuration.
    pub fn apply_profile_change(&mut self, profile: Profile) -> Result<()> {
        info!("Profile changed from {} to {profile}", self.profile);
        self.profile = profile;
        self.arena = default_arena(profile);

        if self.settings_view.is_some() {
            self.close_settings();
            self.open_settings();
        }

        if self.is_connected() {
            self.disconnect_and_reconnect()?;
        }
        Ok(())
    }

    /// Connects and pushes profile and arena, then starts the scan. Any
    /// failure after the connection is up disconnects again before the
    /// error is returned.
    pub fn connect_and_configure(&mut self) -> Result<()> {
        self.session.connect()?;
        let profile = self.profile;
        let arena = self.arena;
        let configured = self
            .session
            .set_profile(profile)
            .and_then(|_| self.session.set_arena(&arena))
            .and_then(|_| self.session.start());
        if let Err(e) = configured {
            error!("Setup failed, disconnecting: {e}");
            self.session.abandon();
            return Err(e);
        }
        self.preview = None;
        info!(
            "Device ready: profile {profile}, threshold {}, filter {}",
            arena.threshold, arena.filter
        );
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<()> {
        self.session.disconnect()
    }

    pub fn disconnect_and_reconnect(&mut self) -> Result<()> {
        self.session.disconnect()?;
        self.connect_and_configure()
    }

    /// Validates the form and stores the new settings. Nothing changes when
    /// a field does not parse. While connected the device is reconnected so
    /// the new arena takes effect.
    pub fn apply_settings(&mut self, form: &SettingsForm) -> Result<()> {
        if form.coordinates != self.profile.coordinates() {
            return Err(AcquisitionError::Config(format!(
                "the settings were entered for a {:?} arena but profile {} is active",
                form.coordinates, self.profile
            )));
        }
        let arena = form.parse()?;
        self.arena = arena;
        self.close_settings();
        debug!("Settings applied: {:?}", self.arena);

        if self.is_connected() {
            self.disconnect_and_reconnect()?;
        }
        Ok(())
    }

    pub fn trigger_capture(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(AcquisitionError::not_connected());
        }
        self.session.trigger()?;
        self.capture_saved = false;
        info!("Triggered");
        if self.preview_enabled {
            self.refresh_preview()?;
        }
        Ok(())
    }

    /// Reads the current slice and renders it through the active palette.
    pub fn refresh_preview(&mut self) -> Result<&PreviewImage> {
        let slice = self.session.read_image_slice()?;
        let preview = self.render_preview(&slice);
        Ok(self.preview.insert(preview))
    }

    pub fn render_preview(&self, slice: &ImageSlice) -> PreviewImage {
        render_preview(slice, self.palette)
    }

    pub fn calibrate<F>(
        &mut self,
        options: &CalibrationOptions,
        cancel: &AtomicBool,
        on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(f64),
    {
        if !self.is_connected() {
            return Err(AcquisitionError::not_connected());
        }
        self.session.calibrate(options, cancel, on_progress)
    }

    /// Saves the selected kinds of the current capture.
    ///
    /// Asks before saving the same trigger twice and before overwriting any
    /// existing target. Declining either question aborts with nothing
    /// written. Kinds are written one after the other, a failure leaves the
    /// files already written in place and does not advance the counter.
    pub fn save_capture<C>(
        &mut self,
        selection: &CaptureSelection,
        confirm: &mut C,
    ) -> Result<SaveOutcome>
    where
        C: Confirm + ?Sized,
    {
        if selection.is_empty() {
            return Err(AcquisitionError::Selection);
        }
        if !self.is_connected() {
            return Err(AcquisitionError::not_connected());
        }
        if self.capture_saved {
            let prompt = ConfirmPrompt::RepeatSave;
            if !confirm.confirm(&prompt) {
                info!("Save cancelled: trigger already saved");
                return Ok(SaveOutcome::Declined(prompt));
            }
        }
        let existing = self.naming.existing_targets(selection);
        if !existing.is_empty() {
            let prompt = ConfirmPrompt::Overwrite(existing);
            if !confirm.confirm(&prompt) {
                warn!("Save cancelled: no acquisition(s) were saved");
                return Ok(SaveOutcome::Declined(prompt));
            }
        }

        let mut files = Vec::new();
        for kind in selection.kinds() {
            self.save_kind(kind, &mut files)?;
        }

        let report = SaveReport {
            counter: self.naming.counter,
            files,
        };
        self.capture_saved = true;
        self.naming.counter += 1;
        info!(
            "Saved capture {} ({} files)",
            report.counter,
            report.files.len()
        );
        Ok(SaveOutcome::Saved(report))
    }

    fn save_kind(&mut self, kind: CaptureKind, files: &mut Vec<PathBuf>) -> Result<()> {
        let path = self.naming.capture_path(kind);
        match kind {
            CaptureKind::Signals => {
                let signals = self.session.read_signals()?;
                storage::write_signals(&path, &signals)?;
            }
            CaptureKind::ImageSlice => {
                let slice = self.session.read_image_slice()?;
                storage::write_image_slice(&path, &slice)?;
            }
            CaptureKind::ImageVolume => {
                let volume = self.session.read_image_volume()?;
                storage::write_image_volume(&path, &volume)?;
            }
        }
        files.push(path);
        if let Some(axes_path) = self.naming.axes_path(kind) {
            storage::write_axes(&axes_path, self.profile.coordinates(), &self.arena.axes)?;
            files.push(axes_path);
        }
        Ok(())
    }

    /// Disconnects on application exit.
    pub fn shutdown(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.session.disconnect() {
                warn!("Disconnect on shutdown failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SimulatedDriver;

    fn controller(profile: Profile) -> AcquisitionController<SimulatedDriver> {
        let session = DeviceSession::new(SimulatedDriver::new()).unwrap();
        AcquisitionController::new(session, profile)
    }

    #[test]
    fn form_round_trips_current_arena() {
        let arena = default_arena(Profile::ShortRangeImaging);
        let form = SettingsForm::from_arena(CoordinateSystem::Cartesian, &arena);
        assert_eq!(form.axes[0], ["-4", "4", "0.25"]);
        assert_eq!(form.parse().unwrap(), arena);
    }

    #[test]
    fn form_reports_which_family_failed() {
        let arena = default_arena(Profile::Tracker);
        let mut form = SettingsForm::from_arena(CoordinateSystem::Spherical, &arena);
        form.threshold = "high".to_string();
        let err = form.parse().unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Field {
                family: FieldFamily::Threshold,
                ..
            }
        ));
        *form.field_mut(4).unwrap() = "x".to_string();
        let err = form.parse().unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Field {
                family: FieldFamily::Arena,
                ..
            }
        ));
    }

    #[test]
    fn form_labels_follow_coordinates() {
        let form = SettingsForm::from_arena(
            CoordinateSystem::Spherical,
            &default_arena(Profile::SensorNarrow),
        );
        assert_eq!(form.field_label(3), "Arena theta [deg] min");
        assert_eq!(form.field_label(9), "Threshold");
    }

    #[test]
    fn settings_view_is_a_single_handle() {
        let mut controller = controller(Profile::ShortRangeImaging);
        controller.open_settings().threshold = "12".to_string();
        assert_eq!(controller.open_settings().threshold, "12");
        controller.close_settings();
        assert!(controller.settings_view().is_none());
    }

    #[test]
    fn profile_change_reopens_settings_for_new_coordinates() {
        let mut controller = controller(Profile::ShortRangeImaging);
        controller.open_settings();
        controller.apply_profile_change(Profile::Tracker).unwrap();
        let view = controller.settings_view().unwrap();
        assert_eq!(view.coordinates, CoordinateSystem::Spherical);
        assert_eq!(view.axes[0][0], "10");
    }

    #[test]
    fn trigger_requires_connection() {
        let mut controller = controller(Profile::ShortRangeImaging);
        let err = controller.trigger_capture().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connection);
    }

    #[test]
    fn preview_is_rendered_on_trigger() {
        let mut controller = controller(Profile::ShortRangeImaging);
        controller.set_preview(true);
        controller.connect_and_configure().unwrap();
        assert!(controller.preview().is_none());
        controller.trigger_capture().unwrap();
        let preview = controller.preview().unwrap();
        assert_eq!((preview.width, preview.height), (33, 41));
    }

    #[test]
    fn stale_form_is_rejected() {
        let mut controller = controller(Profile::ShortRangeImaging);
        let form = controller.open_settings().clone();
        controller.apply_profile_change(Profile::SensorNarrow).unwrap();
        let err = controller.apply_settings(&form).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
