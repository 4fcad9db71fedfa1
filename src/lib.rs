use std::sync::atomic::AtomicBool;

use log::{info, warn};

mod cli;
pub mod capture;
pub mod colormap;
pub mod controller;
pub mod driver;
pub mod error;
pub mod profile;
pub mod session;
pub mod storage;

pub use cli::AcquisitionParams;
pub use controller::{
    AcquisitionController, Confirm, ConfirmPrompt, SaveOutcome, SaveReport, SettingsForm,
};
pub use error::{AcquisitionError, ErrorKind, Result};

use crate::driver::{Driver, SimulatedDriver};
use crate::session::DeviceSession;
use crate::storage::OutputNaming;

/// Builds a controller from the command line parameters. The vendor SDK is
/// not bundled, so the session runs on the simulated driver.
pub fn build_controller(params: &AcquisitionParams) -> Result<AcquisitionController<SimulatedDriver>> {
    let driver = if params.simulate_missing_device {
        SimulatedDriver::without_device()
    } else {
        SimulatedDriver::new()
    };
    let session = DeviceSession::new(driver)?;
    let mut controller = AcquisitionController::new(session, params.profile).with_naming(
        OutputNaming::new(&params.output_dir, &params.prefix, params.counter),
    );
    *controller.selection_mut() = params.selection();
    controller.set_preview(params.preview);
    controller.set_palette(params.palette);

    if params.threshold.is_some() || params.filter != controller.arena().filter {
        let form = controller.open_settings();
        if let Some(threshold) = params.threshold {
            form.threshold = threshold.to_string();
        }
        form.filter = params.filter;
        let form = form.clone();
        controller.apply_settings(&form)?;
    }
    Ok(controller)
}

/// Connects, optionally calibrates, then triggers `params.captures` times and
/// saves the selected kinds after every trigger. The device is disconnected
/// before returning, whatever the outcome.
pub fn run_acquisition<D, C>(
    controller: &mut AcquisitionController<D>,
    params: &AcquisitionParams,
    confirm: &mut C,
) -> Result<Vec<SaveOutcome>>
where
    D: Driver,
    C: Confirm + ?Sized,
{
    controller.connect_and_configure()?;
    let result = capture_loop(controller, params, confirm);
    controller.shutdown();
    result
}

fn capture_loop<D, C>(
    controller: &mut AcquisitionController<D>,
    params: &AcquisitionParams,
    confirm: &mut C,
) -> Result<Vec<SaveOutcome>>
where
    D: Driver,
    C: Confirm + ?Sized,
{
    if params.calibrate {
        let cancel = AtomicBool::new(false);
        controller.calibrate(&params.calibration_options(), &cancel, |progress| {
            info!("Calibrating: {progress:.0}%")
        })?;
    }

    let selection = controller.selection();
    let mut outcomes = Vec::new();
    for capture in 0..params.captures {
        controller.trigger_capture()?;
        if selection.is_empty() {
            info!("Capture {capture}: nothing selected to save");
            continue;
        }
        let outcome = controller.save_capture(&selection, confirm)?;
        if let SaveOutcome::Declined(prompt) = &outcome {
            warn!("Capture {capture} not saved: {}", prompt.title());
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
