use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::info;

use crate::capture::CaptureSelection;
use crate::colormap::Palette;
use crate::profile::{Filter, Profile};
use crate::session::CalibrationOptions;
use crate::storage::DEFAULT_PREFIX;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct AcquisitionParams {
    /// Scan profile, selects Cartesian or spherical arena coordinates
    #[arg(long, value_enum, default_value_t = Profile::ShortRangeImaging)]
    pub profile: Profile,

    /// Detection threshold, 0.1-100 (profile default when omitted)
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Dynamic image filter
    #[arg(long, value_enum, default_value_t = Filter::None)]
    pub filter: Filter,

    /// Prefix of the saved file names
    #[arg(long, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    /// Directory the capture files are written to
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Capture number used in the first file name
    #[arg(short = 'n', long, default_value_t = 0)]
    pub counter: u64,

    /// Save raw signals
    #[arg(long)]
    pub signals: bool,

    /// Save the 2D image slice
    #[arg(long)]
    pub slice: bool,

    /// Save the 3D image
    #[arg(long)]
    pub volume: bool,

    /// Number of triggers to capture
    #[arg(short = 'c', long, default_value_t = 1)]
    pub captures: u32,

    /// Run the device calibration before capturing
    #[arg(long)]
    pub calibrate: bool,

    /// Give up on calibration after this many seconds
    #[arg(long, default_value_t = 30)]
    pub calibration_timeout_secs: u64,

    /// Render the image slice after every trigger
    #[arg(long)]
    pub preview: bool,

    /// Colour palette of the preview
    #[arg(long, value_enum, default_value_t = Palette::Jet)]
    pub palette: Palette,

    /// Answer yes to every save confirmation
    #[arg(short = 'y', long)]
    pub assume_yes: bool,

    /// Pretend no device is attached (exercises the connection error path)
    #[arg(long)]
    pub simulate_missing_device: bool,
}

impl AcquisitionParams {
    pub fn selection(&self) -> CaptureSelection {
        CaptureSelection {
            signals: self.signals,
            image_slice: self.slice,
            image_volume: self.volume,
        }
    }

    pub fn calibration_options(&self) -> CalibrationOptions {
        CalibrationOptions {
            timeout: Duration::from_secs(self.calibration_timeout_secs),
            ..CalibrationOptions::default()
        }
    }

    pub fn pretty_print(&self) {
        info!("Acquisition Parameters:");
        info!(
            "Profile: {} ({:?} arena), filter {}",
            self.profile,
            self.profile.coordinates(),
            self.filter
        );
        match self.threshold {
            Some(threshold) => info!("Threshold: {threshold}"),
            None => info!("Threshold: profile default"),
        }
        info!(
            "Output: {}/{}_{}_<type>.csv",
            self.output_dir.display(),
            self.prefix,
            self.counter
        );
        info!(
            "Save: signals {}, 2D slice {}, 3D image {}",
            self.signals, self.slice, self.volume
        );
        info!(
            "Captures: {}, calibrate {} (timeout {} s)",
            self.captures, self.calibrate, self.calibration_timeout_secs
        );
        info!("Preview: {} with {:?} palette", self.preview, self.palette);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_operator_panel() {
        let params = AcquisitionParams::parse_from(["radar_acquisition"]);
        assert_eq!(params.profile, Profile::ShortRangeImaging);
        assert_eq!(params.prefix, "capture");
        assert_eq!(params.counter, 0);
        assert!(params.selection().is_empty());
        assert_eq!(params.palette, Palette::Jet);
    }

    #[test]
    fn parses_profile_and_selection() {
        let params = AcquisitionParams::parse_from([
            "radar_acquisition",
            "--profile",
            "sensor-narrow",
            "--signals",
            "--volume",
            "--filter",
            "mti",
            "-n",
            "4",
        ]);
        assert_eq!(params.profile, Profile::SensorNarrow);
        assert_eq!(params.filter, Filter::Mti);
        assert_eq!(params.counter, 4);
        let selection = params.selection();
        assert!(selection.signals && selection.image_volume && !selection.image_slice);
    }
}
