use std::path::Path;

use image::{imageops, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::contrast::{otsu_level, threshold};
use imageproc::filter::filter3x3;
use log::{debug, warn};

use crate::models::{NormalizedImage, RawImage, Variant};
use crate::utils::RegistryError;

/// Page header band removed from every capture.
pub const TOP_CROP: u32 = 120;
/// Page footer band removed from every capture.
pub const BOTTOM_CROP: u32 = 10;

/// HSV value band of the pale gray watermark ink (#E3E3E3 and neighbours).
const WATERMARK_VALUE_MIN: u8 = 200;
const WATERMARK_VALUE_MAX: u8 = 245;
const WATERMARK_SATURATION_MAX: u8 = 30;

/// Tighter RGB band used by the alternative variant.
const WATERMARK_RGB_MIN: u8 = 210;
const WATERMARK_RGB_MAX: u8 = 240;

const CLAHE_TILES: u32 = 8;
const CLAHE_CLIP_LIMIT: f32 = 3.0;

const SHARPEN_KERNEL: [i32; 9] = [-1, -1, -1, -1, 9, -1, -1, -1, -1];

const ADAPTIVE_WINDOW: u32 = 21;
const ADAPTIVE_BIAS: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropMargins {
    pub top: u32,
    pub bottom: u32,
}

impl CropMargins {
    pub fn total(&self) -> u32 {
        self.top + self.bottom
    }
}

impl Default for CropMargins {
    fn default() -> Self {
        Self {
            top: TOP_CROP,
            bottom: BOTTOM_CROP,
        }
    }
}

/// ImageProcessor turns a raw registry screenshot into binarized images
/// that the OCR engine reads more reliably.
#[derive(Debug, Clone, Default)]
pub struct ImageProcessor {
    margins: CropMargins,
}

impl ImageProcessor {
    pub fn new(margins: CropMargins) -> Self {
        Self { margins }
    }

    /// Decode an image file into three 8-bit channels.
    pub fn load_raw_image<P: AsRef<Path>>(path: P) -> Result<RawImage, RegistryError> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|e| RegistryError::ImageRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(img.to_rgb8())
    }

    /// Remove the fixed header and footer bands.
    pub fn crop_margins(&self, raw: &RawImage) -> Result<RawImage, RegistryError> {
        let (width, height) = raw.dimensions();
        if height <= self.margins.total() {
            return Err(RegistryError::ImageTooSmall {
                height,
                margins: self.margins.total(),
            });
        }

        let cropped_height = height - self.margins.total();
        Ok(imageops::crop_imm(raw, 0, self.margins.top, width, cropped_height).to_image())
    }

    /// Cropped frame, or the full frame when the image is too small to crop.
    pub fn crop_or_full(&self, raw: &RawImage) -> RawImage {
        match self.crop_margins(raw) {
            Ok(cropped) => cropped,
            Err(e) => {
                warn!("{}; using the full frame", e);
                raw.clone()
            }
        }
    }

    pub fn normalize(&self, raw: &RawImage, variant: Variant) -> NormalizedImage {
        let cropped = self.crop_or_full(raw);
        let image = match variant {
            Variant::Primary => Self::primary_pipeline(&cropped),
            Variant::Alternative => Self::alternative_pipeline(&cropped),
            Variant::Unprocessed => imageops::grayscale(&cropped),
        };
        debug!(
            "Normalized {}x{} image with {} variant",
            image.width(),
            image.height(),
            variant
        );
        NormalizedImage { image, variant }
    }

    fn primary_pipeline(cropped: &RgbImage) -> GrayImage {
        let cleaned = Self::suppress_watermark_hsv(cropped);
        let gray = imageops::grayscale(&cleaned);
        let enhanced = Self::local_contrast(&gray, CLAHE_TILES, CLAHE_CLIP_LIMIT);
        let sharpened = Self::sharpen(&enhanced);
        let binary = Self::otsu_binarize(&sharpened);
        Self::finish_binary(binary)
    }

    fn alternative_pipeline(cropped: &RgbImage) -> GrayImage {
        let cleaned = Self::suppress_watermark_rgb(cropped);
        let gray = imageops::grayscale(&cleaned);
        let binary = Self::adaptive_threshold(&gray, ADAPTIVE_WINDOW, ADAPTIVE_BIAS);
        Self::finish_binary(binary)
    }

    // Polarity, stroke thickening, then a final polarity guard so the
    // output never has more black than white.
    fn finish_binary(binary: GrayImage) -> GrayImage {
        let oriented = Self::correct_polarity(binary);
        let thickened = Self::thicken_strokes(&oriented);
        Self::correct_polarity(thickened)
    }

    /// Repaint low-saturation light gray pixels (the watermark ink) white.
    pub fn suppress_watermark_hsv(img: &RgbImage) -> RgbImage {
        let mut output = img.clone();
        for pixel in output.pixels_mut() {
            let Rgb([r, g, b]) = *pixel;
            let value = r.max(g).max(b);
            let min = r.min(g).min(b);
            let saturation = if value == 0 {
                0
            } else {
                ((value - min) as u32 * 255 / value as u32) as u8
            };

            if (WATERMARK_VALUE_MIN..=WATERMARK_VALUE_MAX).contains(&value)
                && saturation <= WATERMARK_SATURATION_MAX
            {
                *pixel = Rgb([255, 255, 255]);
            }
        }
        output
    }

    /// Repaint pixels whose three channels all sit in the watermark gray band.
    pub fn suppress_watermark_rgb(img: &RgbImage) -> RgbImage {
        let band = WATERMARK_RGB_MIN..=WATERMARK_RGB_MAX;
        let mut output = img.clone();
        for pixel in output.pixels_mut() {
            if pixel.0.iter().all(|c| band.contains(c)) {
                *pixel = Rgb([255, 255, 255]);
            }
        }
        output
    }

    /// Contrast-limited histogram equalization over a grid of tiles, with
    /// bilinear blending between neighbouring tile mappings.
    pub fn local_contrast(gray: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return gray.clone();
        }

        let tile_w = (width + tiles.min(width) - 1) / tiles.min(width);
        let tile_h = (height + tiles.min(height) - 1) / tiles.min(height);
        let tiles_x = (width + tile_w - 1) / tile_w;
        let tiles_y = (height + tile_h - 1) / tile_h;

        // One 256-entry lookup table per tile.
        let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let x1 = (x0 + tile_w).min(width);
                let y1 = (y0 + tile_h).min(height);

                let mut hist = [0u32; 256];
                for y in y0..y1 {
                    for x in x0..x1 {
                        hist[gray.get_pixel(x, y)[0] as usize] += 1;
                    }
                }
                let area = (x1 - x0) * (y1 - y0);
                luts[(ty * tiles_x + tx) as usize] = Self::clipped_equalization(&hist, area, clip_limit);
            }
        }

        let mut output = ImageBuffer::new(width, height);
        for (x, y, pixel) in gray.enumerate_pixels() {
            let value = pixel[0] as usize;

            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
            let (tx0, tx1, wx) = Self::neighbour_tiles(fx, tiles_x);
            let (ty0, ty1, wy) = Self::neighbour_tiles(fy, tiles_y);

            let at = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][value] as f32;
            let top = at(tx0, ty0) * (1.0 - wx) + at(tx1, ty0) * wx;
            let bottom = at(tx0, ty1) * (1.0 - wx) + at(tx1, ty1) * wx;
            let blended = top * (1.0 - wy) + bottom * wy;

            output.put_pixel(x, y, Luma([blended.round().clamp(0.0, 255.0) as u8]));
        }
        output
    }

    fn clipped_equalization(hist: &[u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
        let mut hist = *hist;
        let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

        let mut excess = 0u32;
        for bin in hist.iter_mut() {
            if *bin > limit {
                excess += *bin - limit;
                *bin = limit;
            }
        }
        let share = excess / 256;
        let remainder = (excess % 256) as usize;
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin += share + u32::from(i < remainder);
        }

        let mut lut = [0u8; 256];
        let mut cdf = 0u32;
        let scale = 255.0 / area.max(1) as f32;
        for (i, bin) in hist.iter().enumerate() {
            cdf += bin;
            lut[i] = (cdf as f32 * scale).round().min(255.0) as u8;
        }
        lut
    }

    fn neighbour_tiles(position: f32, count: u32) -> (u32, u32, f32) {
        if position <= 0.0 {
            return (0, 0, 0.0);
        }
        let lower = position.floor() as u32;
        if lower >= count - 1 {
            return (count - 1, count - 1, 0.0);
        }
        (lower, lower + 1, position - lower as f32)
    }

    /// High-pass 3x3 sharpening.
    pub fn sharpen(gray: &GrayImage) -> GrayImage {
        filter3x3::<Luma<u8>, i32, u8>(gray, &SHARPEN_KERNEL)
    }

    /// Global binarization at the Otsu level.
    pub fn otsu_binarize(gray: &GrayImage) -> GrayImage {
        let level = otsu_level(gray);
        debug!("Otsu level {}", level);
        threshold(gray, level)
    }

    /// Local mean threshold: a pixel is white when it is brighter than the
    /// mean of its window minus `bias`.
    pub fn adaptive_threshold(gray: &GrayImage, window: u32, bias: i32) -> GrayImage {
        let (width, height) = gray.dimensions();
        let mut output = ImageBuffer::new(width, height);
        if width == 0 || height == 0 {
            return output;
        }

        // Summed-area table with a zero row and column in front.
        let stride = width as usize + 1;
        let mut integral = vec![0u64; stride * (height as usize + 1)];
        for y in 0..height as usize {
            let mut row_sum = 0u64;
            for x in 0..width as usize {
                row_sum += gray.get_pixel(x as u32, y as u32)[0] as u64;
                integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
            }
        }

        let radius = window / 2;
        for y in 0..height {
            for x in 0..width {
                let x0 = x.saturating_sub(radius) as usize;
                let y0 = y.saturating_sub(radius) as usize;
                let x1 = (x + radius).min(width - 1) as usize + 1;
                let y1 = (y + radius).min(height - 1) as usize + 1;

                let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                    - integral[y0 * stride + x1]
                    - integral[y1 * stride + x0];
                let count = ((x1 - x0) * (y1 - y0)) as u64;
                let mean = (sum / count) as i32;

                let value = gray.get_pixel(x, y)[0] as i32;
                let out = if value > mean - bias { 255 } else { 0 };
                output.put_pixel(x, y, Luma([out]));
            }
        }
        output
    }

    /// Invert when black pixels outnumber white ones, so text is always dark
    /// on a light background.
    pub fn correct_polarity(mut binary: GrayImage) -> GrayImage {
        let black = binary.pixels().filter(|p| p[0] == 0).count();
        let white = binary.pixels().filter(|p| p[0] == 255).count();
        if black > white {
            debug!("Inverting polarity ({} black vs {} white)", black, white);
            imageops::invert(&mut binary);
        }
        binary
    }

    /// Grow dark strokes by one 2x2 structuring-element pass.
    pub fn thicken_strokes(binary: &GrayImage) -> GrayImage {
        let (width, height) = binary.dimensions();
        ImageBuffer::from_fn(width, height, |x, y| {
            let left = x.saturating_sub(1);
            let up = y.saturating_sub(1);
            let darkest = binary
                .get_pixel(x, y)[0]
                .min(binary.get_pixel(left, y)[0])
                .min(binary.get_pixel(x, up)[0])
                .min(binary.get_pixel(left, up)[0]);
            Luma([darkest])
        })
    }
}
