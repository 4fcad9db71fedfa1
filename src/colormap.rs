//! False-colour rendering of image slices.

use std::path::Path;

use clap::ValueEnum;
use image::{imageops, Rgb, RgbImage};

use crate::capture::ImageSlice;
use crate::error::Result;

/// Blue to green to red gradient indexed by slice intensity (0..=255).
#[rustfmt::skip]
pub const JET: [u32; 256] = [
    0x000083, 0x000087, 0x00008B, 0x00008F, 0x000093, 0x000097, 0x00009B, 0x00009F,
    0x0000A3, 0x0000A7, 0x0000AB, 0x0000AF, 0x0000B3, 0x0000B7, 0x0000BB, 0x0000BF,
    0x0000C3, 0x0000C7, 0x0000CB, 0x0000CF, 0x0000D3, 0x0000D7, 0x0000DB, 0x0000DF,
    0x0000E3, 0x0000E7, 0x0000EB, 0x0000EF, 0x0000F3, 0x0000F7, 0x0000FB, 0x0000FF,
    0x0003FF, 0x0007FF, 0x000BFF, 0x000FFF, 0x0013FF, 0x0017FF, 0x001BFF, 0x001FFF,
    0x0023FF, 0x0027FF, 0x002BFF, 0x002FFF, 0x0033FF, 0x0037FF, 0x003BFF, 0x003FFF,
    0x0043FF, 0x0047FF, 0x004BFF, 0x004FFF, 0x0053FF, 0x0057FF, 0x005BFF, 0x005FFF,
    0x0063FF, 0x0067FF, 0x006BFF, 0x006FFF, 0x0073FF, 0x0077FF, 0x007BFF, 0x007FFF,
    0x0083FF, 0x0087FF, 0x008BFF, 0x008FFF, 0x0093FF, 0x0097FF, 0x009BFF, 0x009FFF,
    0x00A3FF, 0x00A7FF, 0x00ABFF, 0x00AFFF, 0x00B3FF, 0x00B7FF, 0x00BBFF, 0x00BFFF,
    0x00C3FF, 0x00C7FF, 0x00CBFF, 0x00CFFF, 0x00D3FF, 0x00D7FF, 0x00DBFF, 0x00DFFF,
    0x00E3FF, 0x00E7FF, 0x00EBFF, 0x00EFFF, 0x00F3FF, 0x00F7FF, 0x00FBFF, 0x00FFFF,
    0x03FFFB, 0x07FFF7, 0x0BFFF3, 0x0FFFEF, 0x13FFEB, 0x17FFE7, 0x1BFFE3, 0x1FFFDF,
    0x23FFDB, 0x27FFD7, 0x2BFFD3, 0x2FFFCF, 0x33FFCB, 0x37FFC7, 0x3BFFC3, 0x3FFFBF,
    0x43FFBB, 0x47FFB7, 0x4BFFB3, 0x4FFFAF, 0x53FFAB, 0x57FFA7, 0x5BFFA3, 0x5FFF9F,
    0x63FF9B, 0x67FF97, 0x6BFF93, 0x6FFF8F, 0x73FF8B, 0x77FF87, 0x7BFF83, 0x7FFF7F,
    0x83FF7B, 0x87FF77, 0x8BFF73, 0x8FFF6F, 0x93FF6B, 0x97FF67, 0x9BFF63, 0x9FFF5F,
    0xA3FF5B, 0xA7FF57, 0xABFF53, 0xAFFF4F, 0xB3FF4B, 0xB7FF47, 0xBBFF43, 0xBFFF3F,
    0xC3FF3B, 0xC7FF37, 0xCBFF33, 0xCFFF2F, 0xD3FF2B, 0xD7FF27, 0xDBFF23, 0xDFFF1F,
    0xE3FF1B, 0xE7FF17, 0xEBFF13, 0xEFFF0F, 0xF3FF0B, 0xF7FF07, 0xFBFF03, 0xFFFF00,
    0xFFFB00, 0xFFF700, 0xFFF300, 0xFFEF00, 0xFFEB00, 0xFFE700, 0xFFE300, 0xFFDF00,
    0xFFDB00, 0xFFD700, 0xFFD300, 0xFFCF00, 0xFFCB00, 0xFFC700, 0xFFC300, 0xFFBF00,
    0xFFBB00, 0xFFB700, 0xFFB300, 0xFFAF00, 0xFFAB00, 0xFFA700, 0xFFA300, 0xFF9F00,
    0xFF9B00, 0xFF9700, 0xFF9300, 0xFF8F00, 0xFF8B00, 0xFF8700, 0xFF8300, 0xFF7F00,
    0xFF7B00, 0xFF7700, 0xFF7300, 0xFF6F00, 0xFF6B00, 0xFF6700, 0xFF6300, 0xFF5F00,
    0xFF5B00, 0xFF5700, 0xFF5300, 0xFF4F00, 0xFF4B00, 0xFF4700, 0xFF4300, 0xFF3F00,
    0xFF3B00, 0xFF3700, 0xFF3300, 0xFF2F00, 0xFF2B00, 0xFF2700, 0xFF2300, 0xFF1F00,
    0xFF1B00, 0xFF1700, 0xFF1300, 0xFF0F00, 0xFF0B00, 0xFF0700, 0xFF0300, 0xFF0000,
    0xFB0000, 0xF70000, 0xF30000, 0xEF0000, 0xEB0000, 0xE70000, 0xE30000, 0xDF0000,
    0xDB0000, 0xD70000, 0xD30000, 0xCF0000, 0xCB0000, 0xC70000, 0xC30000, 0xBF0000,
    0xBB0000, 0xB70000, 0xB30000, 0xAF0000, 0xAB0000, 0xA70000, 0xA30000, 0x9F0000,
    0x9B0000, 0x970000, 0x930000, 0x8F0000, 0x8B0000, 0x870000, 0x830000, 0x7F0000,
];

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Palette {
    #[default]
    Jet,
    Inferno,
    Turbo,
}

impl Palette {
    pub fn next(self) -> Palette {
        match self {
            Palette::Jet => Palette::Inferno,
            Palette::Inferno => Palette::Turbo,
            Palette::Turbo => Palette::Jet,
        }
    }

    pub fn color(self, index: u8) -> Rgb<u8> {
        match self {
            Palette::Jet => {
                let hex = JET[usize::from(index)];
                Rgb([(hex >> 16) as u8, (hex >> 8) as u8, hex as u8])
            }
            Palette::Inferno => gradient_color(colorous::INFERNO, index),
            Palette::Turbo => gradient_color(colorous::TURBO, index),
        }
    }

    /// Colour used for an empty preview.
    pub fn background(self) -> Rgb<u8> {
        self.color(0)
    }
}

fn gradient_color(gradient: colorous::Gradient, index: u8) -> Rgb<u8> {
    let color = gradient.eval_rational(usize::from(index), 256);
    Rgb([color.r, color.g, color.b])
}

/// Row-major grid of display colours for one image slice.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Rgb<u8>>,
}

impl PreviewImage {
    pub fn pixel(&self, row: usize, column: usize) -> Rgb<u8> {
        self.pixels[row * self.width + column]
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            self.pixel(y as usize, x as usize)
        })
    }

    /// Writes the preview, each sample blown up to `scale` x `scale` pixels.
    pub fn save_png(&self, path: &Path, scale: u32) -> Result<()> {
        let image = self.to_rgb_image();
        let scale = scale.max(1);
        let scaled = imageops::resize(
            &image,
            image.width() * scale,
            image.height() * scale,
            imageops::FilterType::Nearest,
        );
        scaled.save(path)?;
        Ok(())
    }
}

/// Maps every sample of the slice through the palette.
///
/// # Panics
///
/// Samples must be integers in `0..=255`, which the driver guarantees for
/// slices. Anything else is a broken precondition and panics.
pub fn render_preview(slice: &ImageSlice, palette: Palette) -> PreviewImage {
    let pixels = slice
        .data
        .iter()
        .map(|value| {
            assert!(
                (0.0..=255.0).contains(value),
                "image slice sample {value} is outside the colour table"
            );
            palette.color(*value as u8)
        })
        .collect();
    PreviewImage {
        width: slice.width(),
        height: slice.height(),
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn jet_table_runs_blue_to_red() {
        assert_eq!(Palette::Jet.color(0), Rgb([0x00, 0x00, 0x83]));
        assert_eq!(Palette::Jet.color(95), Rgb([0x00, 0xFF, 0xFF]));
        assert_eq!(Palette::Jet.color(159), Rgb([0xFF, 0xFF, 0x00]));
        assert_eq!(Palette::Jet.color(223), Rgb([0xFF, 0x00, 0x00]));
        assert_eq!(Palette::Jet.color(255), Rgb([0x7F, 0x00, 0x00]));
    }

    #[test]
    fn preview_keeps_slice_layout() {
        let slice = ImageSlice {
            data: array![[0.0, 255.0, 0.0], [95.0, 0.0, 0.0]],
        };
        let preview = render_preview(&slice, Palette::Jet);
        assert_eq!((preview.width, preview.height), (3, 2));
        assert_eq!(preview.pixel(0, 1), Rgb([0x7F, 0x00, 0x00]));
        assert_eq!(preview.pixel(1, 0), Rgb([0x00, 0xFF, 0xFF]));
        let image = preview.to_rgb_image();
        assert_eq!(*image.get_pixel(1, 0), Rgb([0x7F, 0x00, 0x00]));
    }

    #[test]
    #[should_panic]
    fn out_of_range_sample_is_fatal() {
        let slice = ImageSlice {
            data: array![[256.0]],
        };
        render_preview(&slice, Palette::Jet);
    }

    #[test]
    fn palettes_cycle_back_to_jet() {
        assert_eq!(Palette::Jet.next().next().next(), Palette::Jet);
    }

    #[test]
    fn gradient_palettes_cover_the_index_range() {
        assert_ne!(Palette::Inferno.color(0), Palette::Inferno.color(255));
        assert_ne!(Palette::Turbo.color(0), Palette::Turbo.color(255));
    }
}
