use std::fmt;

use clap::ValueEnum;

use crate::error::{AcquisitionError, FieldFamily, Result};

/// Scan profile of the device. The profile decides which coordinate system
/// the arena is expressed in.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    ShortRangeImaging,
    SensorNarrow,
    Tracker,
}

impl Profile {
    pub const ALL: [Profile; 3] = [
        Profile::ShortRangeImaging,
        Profile::SensorNarrow,
        Profile::Tracker,
    ];

    /// Profile constant understood by the vendor driver.
    pub fn code(self) -> u32 {
        match self {
            Profile::ShortRangeImaging => 0x0001_0000,
            Profile::SensorNarrow => 0x0002_0001,
            Profile::Tracker => 0x0003_0000,
        }
    }

    pub fn coordinates(self) -> CoordinateSystem {
        match self {
            Profile::ShortRangeImaging => CoordinateSystem::Cartesian,
            Profile::SensorNarrow | Profile::Tracker => CoordinateSystem::Spherical,
        }
    }

    pub fn next(self) -> Profile {
        match self {
            Profile::ShortRangeImaging => Profile::SensorNarrow,
            Profile::SensorNarrow => Profile::Tracker,
            Profile::Tracker => Profile::ShortRangeImaging,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Profile::ShortRangeImaging => "SHORT_RANGE_IMAGING",
            Profile::SensorNarrow => "SENSOR_NARROW",
            Profile::Tracker => "TRACKER",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSystem {
    /// X, Y, Z in centimetres.
    Cartesian,
    /// R in centimetres, theta and phi in degrees.
    Spherical,
}

impl CoordinateSystem {
    /// Column headers of the axis files.
    pub fn axis_names(self) -> [&'static str; 3] {
        match self {
            CoordinateSystem::Cartesian => ["X", "Y", "Z"],
            CoordinateSystem::Spherical => ["R", "theta", "phi"],
        }
    }

    /// Labels shown next to the arena fields of the settings view.
    pub fn axis_labels(self) -> [&'static str; 3] {
        match self {
            CoordinateSystem::Cartesian => ["Arena X [cm]", "Arena Y [cm]", "Arena Z [cm]"],
            CoordinateSystem::Spherical => {
                ["Arena R [cm]", "Arena theta [deg]", "Arena phi [deg]"]
            }
        }
    }
}

/// Dynamic image filter applied by the device.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    None,
    Derivative,
    Mti,
}

impl Filter {
    pub const ALL: [Filter; 3] = [Filter::None, Filter::Derivative, Filter::Mti];

    pub fn code(self) -> u32 {
        match self {
            Filter::None => 0,
            Filter::Derivative => 1,
            Filter::Mti => 2,
        }
    }

    pub fn next(self) -> Filter {
        match self {
            Filter::None => Filter::Derivative,
            Filter::Derivative => Filter::Mti,
            Filter::Mti => Filter::None,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Filter::None => "None",
            Filter::Derivative => "Derivative",
            Filter::Mti => "MTI",
        };
        write!(f, "{name}")
    }
}

/// One `(min, max, step)` axis of the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

// Tolerance used when counting steps so that 8.0 / 0.25 does not lose its
// last sample to floating point error.
const STEP_EPSILON: f64 = 1e-9;

/// Upper bound on the samples of one axis.
pub const MAX_AXIS_SAMPLES: usize = u16::MAX as usize;

impl AxisRange {
    pub fn new(min: f64, max: f64, step: f64) -> Result<Self> {
        let range = Self { min, max, step };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.step.is_finite()) {
            return Err(AcquisitionError::field(
                FieldFamily::Arena,
                "arena bounds must be finite numbers",
            ));
        }
        if self.min > self.max {
            return Err(AcquisitionError::field(
                FieldFamily::Arena,
                format!("minimum {} is larger than maximum {}", self.min, self.max),
            ));
        }
        if self.step <= 0.0 {
            return Err(AcquisitionError::field(
                FieldFamily::Arena,
                format!("resolution {} must be positive", self.step),
            ));
        }
        if self.step_count() >= MAX_AXIS_SAMPLES as f64 {
            return Err(AcquisitionError::field(
                FieldFamily::Arena,
                format!(
                    "{}..{} at resolution {} exceeds {MAX_AXIS_SAMPLES} samples",
                    self.min, self.max, self.step
                ),
            ));
        }
        Ok(())
    }

    // Whole steps between min and max. Infinite when the ratio overflows.
    fn step_count(&self) -> f64 {
        ((self.max - self.min) / self.step + STEP_EPSILON).floor()
    }

    /// Never more than `MAX_AXIS_SAMPLES`, even for a range that was not
    /// validated.
    pub fn sample_count(&self) -> usize {
        let steps = self.step_count();
        if steps.is_nan() {
            return 1;
        }
        steps.clamp(0.0, (MAX_AXIS_SAMPLES - 1) as f64) as usize + 1
    }

    /// Inclusive sequence `min, min + step, ...` up to `max`.
    pub fn samples(&self) -> Vec<f64> {
        (0..self.sample_count())
            .map(|i| self.min + i as f64 * self.step)
            .collect()
    }
}

impl fmt::Display for AxisRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{} step {}", self.min, self.max, self.step)
    }
}

/// Scan volume plus detection settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arena {
    /// X/Y/Z or R/theta/phi depending on the profile.
    pub axes: [AxisRange; 3],
    /// Detection threshold, the device accepts 0.1 to 100.
    pub threshold: f64,
    pub filter: Filter,
}

impl Arena {
    pub fn validate(&self) -> Result<()> {
        for axis in &self.axes {
            axis.validate()?;
        }
        if !self.threshold.is_finite() {
            return Err(AcquisitionError::field(
                FieldFamily::Threshold,
                "threshold must be a finite number",
            ));
        }
        Ok(())
    }
}

/// Defaults taken from the vendor's tutorial software.
pub fn default_arena(profile: Profile) -> Arena {
    let axes = match profile.coordinates() {
        CoordinateSystem::Cartesian => [
            AxisRange { min: -4.0, max: 4.0, step: 0.25 },
            AxisRange { min: -6.0, max: 4.0, step: 0.25 },
            AxisRange { min: 3.0, max: 8.0, step: 0.25 },
        ],
        CoordinateSystem::Spherical => [
            AxisRange { min: 10.0, max: 100.0, step: 1.0 },
            AxisRange { min: 40.0, max: 50.0, step: 1.0 },
            AxisRange { min: 40.0, max: 50.0, step: 1.0 },
        ],
    };
    Arena {
        axes,
        threshold: 35.0,
        filter: Filter::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_arenas_are_valid_for_every_profile() {
        for profile in Profile::ALL {
            let arena = default_arena(profile);
            assert!(arena.validate().is_ok(), "{profile}");
            for axis in arena.axes {
                assert!(axis.min <= axis.max);
                assert!(axis.step > 0.0);
            }
        }
    }

    #[test]
    fn expands_quarter_steps_inclusively() {
        let axis = AxisRange::new(-4.0, 4.0, 0.25).unwrap();
        let samples = axis.samples();
        assert_eq!(samples.len(), 33);
        assert_eq!(samples[0], -4.0);
        assert_eq!(samples[32], 4.0);
        for pair in samples.windows(2) {
            assert!((pair[1] - pair[0] - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn degenerate_axis_has_one_sample() {
        let axis = AxisRange::new(5.0, 5.0, 1.0).unwrap();
        assert_eq!(axis.samples(), vec![5.0]);
    }

    #[test]
    fn uneven_range_stops_before_max() {
        let axis = AxisRange::new(0.0, 1.0, 0.3).unwrap();
        assert_eq!(axis.sample_count(), 4);
    }

    #[test]
    fn rejects_inverted_and_non_positive_ranges() {
        assert!(AxisRange::new(4.0, -4.0, 0.25).is_err());
        assert!(AxisRange::new(-4.0, 4.0, 0.0).is_err());
        assert!(AxisRange::new(-4.0, 4.0, -1.0).is_err());
        assert!(AxisRange::new(f64::NAN, 4.0, 1.0).is_err());
    }

    #[test]
    fn rejects_ranges_with_too_many_samples() {
        let err = AxisRange::new(0.0, 1e308, 1e-308).unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::Field {
                family: FieldFamily::Arena,
                ..
            }
        ));
        assert!(AxisRange::new(-1e308, 1e308, 1.0).is_err());
        assert!(AxisRange::new(0.0, 1e9, 1e-3).is_err());
        assert!(AxisRange::new(0.0, MAX_AXIS_SAMPLES as f64, 1.0).is_err());
        let widest = AxisRange::new(0.0, (MAX_AXIS_SAMPLES - 1) as f64, 1.0).unwrap();
        assert_eq!(widest.sample_count(), MAX_AXIS_SAMPLES);
    }

    #[test]
    fn unvalidated_range_count_is_bounded() {
        let huge = AxisRange {
            min: 0.0,
            max: 1e308,
            step: 1e-308,
        };
        assert_eq!(huge.sample_count(), MAX_AXIS_SAMPLES);
    }

    #[test]
    fn profile_selects_coordinates_and_code() {
        assert_eq!(
            Profile::ShortRangeImaging.coordinates(),
            CoordinateSystem::Cartesian
        );
        assert_eq!(Profile::Tracker.coordinates(), CoordinateSystem::Spherical);
        assert_eq!(Profile::SensorNarrow.code(), 0x0002_0001);
        assert_eq!(Profile::Tracker.next(), Profile::ShortRangeImaging);
    }
}
