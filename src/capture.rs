// Capture data pulled from the device after a trigger.
// Signals are per antenna pair time series, images are intensity grids.

use std::fmt;

use ndarray::{Array2, Array3};

use crate::driver::AntennaPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CaptureKind {
    Signals,
    ImageSlice,
    ImageVolume,
}

impl CaptureKind {
    pub const ALL: [CaptureKind; 3] = [
        CaptureKind::Signals,
        CaptureKind::ImageSlice,
        CaptureKind::ImageVolume,
    ];

    /// Suffix used in output file names, e.g. `capture_0_im_2d.csv`.
    pub fn tag(self) -> &'static str {
        match self {
            CaptureKind::Signals => "signals",
            CaptureKind::ImageSlice => "im_2d",
            CaptureKind::ImageVolume => "im_3d",
        }
    }

    /// Tag of the companion axis file, images only.
    pub fn axes_tag(self) -> Option<&'static str> {
        match self {
            CaptureKind::Signals => None,
            CaptureKind::ImageSlice => Some("im_2d_axes"),
            CaptureKind::ImageVolume => Some("im_3d_axes"),
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureKind::Signals => "Raw signals",
            CaptureKind::ImageSlice => "Raw image slice (2D)",
            CaptureKind::ImageVolume => "Raw image (3D)",
        };
        write!(f, "{name}")
    }
}

/// Set of capture kinds the operator wants saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSelection {
    pub signals: bool,
    pub image_slice: bool,
    pub image_volume: bool,
}

impl CaptureSelection {
    pub fn contains(&self, kind: CaptureKind) -> bool {
        match kind {
            CaptureKind::Signals => self.signals,
            CaptureKind::ImageSlice => self.image_slice,
            CaptureKind::ImageVolume => self.image_volume,
        }
    }

    pub fn set(&mut self, kind: CaptureKind, selected: bool) {
        match kind {
            CaptureKind::Signals => self.signals = selected,
            CaptureKind::ImageSlice => self.image_slice = selected,
            CaptureKind::ImageVolume => self.image_volume = selected,
        }
    }

    pub fn toggle(&mut self, kind: CaptureKind) {
        self.set(kind, !self.contains(kind));
    }

    pub fn is_empty(&self) -> bool {
        !(self.signals || self.image_slice || self.image_volume)
    }

    pub fn kinds(&self) -> impl Iterator<Item = CaptureKind> + '_ {
        CaptureKind::ALL.into_iter().filter(|kind| self.contains(*kind))
    }
}

impl FromIterator<CaptureKind> for CaptureSelection {
    fn from_iter<I: IntoIterator<Item = CaptureKind>>(iter: I) -> Self {
        let mut selection = CaptureSelection::default();
        for kind in iter {
            selection.set(kind, true);
        }
        selection
    }
}

/// Raw signals of one trigger: a shared time axis plus one amplitude
/// column per antenna pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalsCapture {
    pub time: Vec<f64>,
    pub pairs: Vec<AntennaPair>,
    pub amplitudes: Vec<Vec<f64>>,
}

impl SignalsCapture {
    pub fn header(&self) -> Vec<String> {
        std::iter::once("time".to_string())
            .chain(
                self.pairs
                    .iter()
                    .map(|pair| format!("tx={} rx={}", pair.tx, pair.rx)),
            )
            .collect()
    }

    /// Number of table rows, the longest column wins.
    pub fn sample_count(&self) -> usize {
        self.amplitudes
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.time.len()))
            .max()
            .unwrap_or(0)
    }

    pub fn pretty_print(&self) -> String {
        format!(
            "Signals: {} antenna pairs, {} samples",
            self.pairs.len(),
            self.sample_count()
        )
    }
}

/// 2-D intensity grid, `rows == height`, `columns == width`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSlice {
    pub data: Array2<f64>,
}

impl ImageSlice {
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn pretty_print(&self) -> String {
        let max = self.data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = self.data.iter().cloned().fold(f64::INFINITY, f64::min);
        format!(
            "Image slice: {}x{} (w x h), min {min}, max {max}",
            self.width(),
            self.height()
        )
    }
}

/// 3-D intensity grid stored as `(depth, rows, columns)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageVolume {
    pub data: Array3<f64>,
}

impl ImageVolume {
    pub fn rows(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn columns(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn depth(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn pretty_print(&self) -> String {
        format!(
            "Image volume: {}x{}x{} (rows x columns x depth)",
            self.rows(),
            self.columns(),
            self.depth()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_header_lists_pairs_after_time() {
        let capture = SignalsCapture {
            time: vec![0.0, 1.0],
            pairs: vec![AntennaPair { tx: 1, rx: 2 }, AntennaPair { tx: 3, rx: 4 }],
            amplitudes: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
        };
        assert_eq!(capture.header(), vec!["time", "tx=1 rx=2", "tx=3 rx=4"]);
        assert_eq!(capture.sample_count(), 2);
    }

    #[test]
    fn selection_toggles_and_iterates_in_order() {
        let mut selection: CaptureSelection =
            [CaptureKind::ImageVolume, CaptureKind::Signals].into_iter().collect();
        assert_eq!(
            selection.kinds().collect::<Vec<_>>(),
            vec![CaptureKind::Signals, CaptureKind::ImageVolume]
        );
        selection.toggle(CaptureKind::Signals);
        selection.toggle(CaptureKind::ImageVolume);
        assert!(selection.is_empty());
    }

    #[test]
    fn volume_dimensions_follow_storage_order() {
        let volume = ImageVolume {
            data: Array3::zeros((4, 2, 3)),
        };
        assert_eq!((volume.rows(), volume.columns(), volume.depth()), (2, 3, 4));
    }
}
