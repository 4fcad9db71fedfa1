//! CSV persistence of captures.
//!
//! File names follow `<prefix>_<counter>_<tag>.csv`. The counter is owned by
//! the operator: it only moves when a save completes or when it is edited.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use log::{debug, info};
use ndarray::{Array2, Array3};

use crate::capture::{CaptureKind, CaptureSelection, ImageSlice, ImageVolume, SignalsCapture};
use crate::error::{AcquisitionError, Result};
use crate::profile::{AxisRange, CoordinateSystem};

pub const DEFAULT_PREFIX: &str = "capture";

const SHAPE_COMMENT: &str = "# Array shape (rows x columns x depth): ";
const SLICE_MARKER: &str = "# New slice";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    pub directory: PathBuf,
    pub prefix: String,
    pub counter: u64,
}

impl Default for OutputNaming {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            prefix: DEFAULT_PREFIX.to_string(),
            counter: 0,
        }
    }
}

impl OutputNaming {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, counter: u64) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            counter,
        }
    }

    pub fn file_name(&self, tag: &str) -> String {
        format!("{}_{}_{}.csv", self.prefix, self.counter, tag)
    }

    pub fn path(&self, tag: &str) -> PathBuf {
        self.directory.join(self.file_name(tag))
    }

    pub fn capture_path(&self, kind: CaptureKind) -> PathBuf {
        self.path(kind.tag())
    }

    pub fn axes_path(&self, kind: CaptureKind) -> Option<PathBuf> {
        kind.axes_tag().map(|tag| self.path(tag))
    }

    /// Data files of the selected kinds that are already on disk.
    pub fn existing_targets(&self, selection: &CaptureSelection) -> Vec<PathBuf> {
        selection
            .kinds()
            .map(|kind| self.capture_path(kind))
            .filter(|path| path.exists())
            .collect()
    }
}

// Shortest round-tripping form, exponent notation for very small or large
// values.
fn format_value(value: f64) -> String {
    format!("{value:?}")
}

fn format_axis_value(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn format_rounded(value: f64) -> String {
    format!("{value:.0}")
}

/// Header row of antenna pair labels, one row per time sample.
pub fn write_signals(path: &Path, capture: &SignalsCapture) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(capture.header())?;
    for i in 0..capture.sample_count() {
        let row = std::iter::once(capture.time.get(i))
            .chain(capture.amplitudes.iter().map(|column| column.get(i)))
            .map(|value| value.map(|v| format_value(*v)).unwrap_or_default());
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!("Saved {} to {}", capture.pretty_print(), path.display());
    Ok(())
}

fn write_grid<W: Write>(out: W, grid: ndarray::ArrayView2<'_, f64>) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(out);
    for row in grid.rows() {
        writer.write_record(row.iter().map(|v| format_rounded(*v)))?;
    }
    writer.flush()?;
    Ok(())
}

/// Plain integer-rounded grid, no header.
pub fn write_image_slice(path: &Path, slice: &ImageSlice) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    write_grid(file, slice.data.view())?;
    info!("Saved {} to {}", slice.pretty_print(), path.display());
    Ok(())
}

/// Shape comment, then each depth layer followed by a marker line.
pub fn write_image_volume(path: &Path, volume: &ImageVolume) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        "{SHAPE_COMMENT}{}x{}x{}",
        volume.rows(),
        volume.columns(),
        volume.depth()
    )?;
    for layer in volume.data.outer_iter() {
        write_grid(&mut out, layer)?;
        writeln!(out, "{SLICE_MARKER}")?;
    }
    out.flush()?;
    info!("Saved {} to {}", volume.pretty_print(), path.display());
    Ok(())
}

/// One column per axis with the expanded sample positions. Shorter axes are
/// padded with empty cells.
pub fn write_axes(path: &Path, coordinates: CoordinateSystem, axes: &[AxisRange; 3]) -> Result<()> {
    let columns: Vec<Vec<f64>> = axes.iter().map(AxisRange::samples).collect();
    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(coordinates.axis_names())?;
    for i in 0..rows {
        writer.write_record(columns.iter().map(|column| {
            column
                .get(i)
                .map(|v| format_axis_value(*v))
                .unwrap_or_default()
        }))?;
    }
    writer.flush()?;
    debug!("Saved axes to {}", path.display());
    Ok(())
}

fn parse_cell(cell: &str) -> Result<f64> {
    cell.trim()
        .parse::<f64>()
        .map_err(|_| AcquisitionError::Parse(format!("'{cell}' is not a number")))
}

/// Reads back a grid written by `write_image_slice`.
pub fn read_image_slice(path: &Path) -> Result<ImageSlice> {
    let mut reader = ReaderBuilder::new().has_headers(false).from_path(path)?;
    let mut values = Vec::new();
    let mut rows = 0;
    for record in reader.records() {
        let record = record?;
        for cell in record.iter() {
            values.push(parse_cell(cell)?);
        }
        rows += 1;
    }
    let columns = if rows == 0 { 0 } else { values.len() / rows };
    let data = Array2::from_shape_vec((rows, columns), values)
        .map_err(|e| AcquisitionError::Parse(e.to_string()))?;
    Ok(ImageSlice { data })
}

fn parse_shape(comment: &str) -> Result<(usize, usize, usize)> {
    let dims = comment
        .strip_prefix(SHAPE_COMMENT)
        .ok_or_else(|| AcquisitionError::Parse("missing array shape comment".to_string()))?
        .split('x')
        .map(|d| {
            d.trim()
                .parse::<usize>()
                .map_err(|_| AcquisitionError::Parse(format!("bad dimension '{d}'")))
        })
        .collect::<Result<Vec<usize>>>()?;
    match dims.as_slice() {
        [rows, columns, depth] => Ok((*rows, *columns, *depth)),
        _ => Err(AcquisitionError::Parse(format!(
            "expected three dimensions, found {}",
            dims.len()
        ))),
    }
}

/// Reads back a volume written by `write_image_volume`.
pub fn read_image_volume(path: &Path) -> Result<ImageVolume> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut records = reader.records();
    let first = records
        .next()
        .ok_or_else(|| AcquisitionError::Parse("empty volume file".to_string()))??;
    let (rows, columns, depth) = parse_shape(first.get(0).unwrap_or_default())?;

    let mut values = Vec::with_capacity(rows * columns * depth);
    let mut layers = 0;
    for record in records {
        let record = record?;
        if record.get(0).is_some_and(|cell| cell.starts_with('#')) {
            layers += 1;
            continue;
        }
        for cell in record.iter() {
            values.push(parse_cell(cell)?);
        }
    }
    if layers != depth {
        return Err(AcquisitionError::Parse(format!(
            "expected {depth} slices, found {layers}"
        )));
    }
    let data = Array3::from_shape_vec((depth, rows, columns), values)
        .map_err(|e| AcquisitionError::Parse(e.to_string()))?;
    Ok(ImageVolume { data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::AntennaPair;
    use ndarray::array;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn names_follow_prefix_counter_tag() {
        let naming = OutputNaming::new("/data", "scan", 7);
        assert_eq!(naming.file_name("im_2d"), "scan_7_im_2d.csv");
        assert_eq!(
            naming.axes_path(CaptureKind::ImageVolume),
            Some(PathBuf::from("/data/scan_7_im_3d_axes.csv"))
        );
        assert_eq!(naming.axes_path(CaptureKind::Signals), None);
    }

    #[test]
    fn only_selected_existing_files_are_reported() {
        let dir = TempDir::new().unwrap();
        let naming = OutputNaming::new(dir.path(), "capture", 0);
        fs::write(naming.capture_path(CaptureKind::ImageVolume), "").unwrap();
        let selection: CaptureSelection = [CaptureKind::Signals].into_iter().collect();
        assert!(naming.existing_targets(&selection).is_empty());
        let selection: CaptureSelection =
            [CaptureKind::Signals, CaptureKind::ImageVolume].into_iter().collect();
        assert_eq!(naming.existing_targets(&selection).len(), 1);
    }

    #[test]
    fn slice_round_trips_integer_grid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slice.csv");
        let slice = ImageSlice {
            data: array![[0.0, 12.0, 255.0], [3.0, 4.0, 5.0]],
        };
        write_image_slice(&path, &slice).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0,12,255\n3,4,5\n");
        assert_eq!(read_image_slice(&path).unwrap(), slice);
    }

    #[test]
    fn slice_values_are_rounded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slice.csv");
        let slice = ImageSlice {
            data: array![[0.4, 7.6]],
        };
        write_image_slice(&path, &slice).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0,8\n");
    }

    #[test]
    fn volume_has_shape_comment_and_slice_markers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("volume.csv");
        let mut data: Array3<f64> = Array3::zeros((2, 2, 3));
        data[[1, 0, 2]] = 9.0;
        let volume = ImageVolume { data };
        write_image_volume(&path, &volume).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# Array shape (rows x columns x depth): 2x3x2");
        assert_eq!(lines[3], "# New slice");
        assert_eq!(lines[4], "0,0,9");
        assert_eq!(lines.len(), 7);
        assert_eq!(read_image_volume(&path).unwrap(), volume);
    }

    #[test]
    fn axes_are_ragged_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("axes.csv");
        let axes = [
            AxisRange { min: 0.0, max: 2.0, step: 1.0 },
            AxisRange { min: -0.5, max: 0.0, step: 0.5 },
            AxisRange { min: 10.0, max: 10.0, step: 1.0 },
        ];
        write_axes(&path, CoordinateSystem::Spherical, &axes).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "R,theta,phi\n0.0,-0.5,10.0\n1.0,0.0,\n2.0,,\n"
        );
    }

    #[test]
    fn signals_table_has_pair_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signals.csv");
        let capture = SignalsCapture {
            time: vec![0.0, 0.5],
            pairs: vec![AntennaPair { tx: 1, rx: 2 }],
            amplitudes: vec![vec![1.25, -3.0]],
        };
        write_signals(&path, &capture).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "time,tx=1 rx=2\n0.0,1.25\n0.5,-3.0\n"
        );
    }

    #[test]
    fn tiny_signal_values_use_exponent_notation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("signals.csv");
        let capture = SignalsCapture {
            time: vec![1.0e-10, 2.5e-10],
            pairs: vec![AntennaPair { tx: 1, rx: 5 }],
            amplitudes: vec![vec![-3.2e-21, 1.0e-3]],
        };
        write_signals(&path, &capture).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "time,tx=1 rx=5\n1e-10,-3.2e-21\n2.5e-10,0.001\n");
        for line in text.lines().skip(1) {
            for cell in line.split(',') {
                assert!(cell.parse::<f64>().is_ok(), "{cell}");
            }
        }
    }
}
