use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array2, ArrayView2, s};

use crate::error::{ForensicsError, Result};

/// Added to min-max denominators so uniform inputs normalise to zero.
pub const NORMALIZE_EPSILON: f64 = 1e-8;

pub fn rgb_to_gray(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let lum = (0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64)
            .round() as u8;
        gray.put_pixel(x, y, Luma([lum]));
    }

    gray
}

pub fn gray_to_rgb(image: &GrayImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let mut rgb = RgbImage::new(width, height);

    for (x, y, pixel) in image.enumerate_pixels() {
        let v = pixel[0];
        rgb.put_pixel(x, y, Rgb([v, v, v]));
    }

    rgb
}

/// Row-major `(height, width)` array of intensities.
pub fn gray_to_array(image: &GrayImage) -> Array2<f64> {
    let (width, height) = image.dimensions();
    let mut arr = Array2::zeros((height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        arr[[y as usize, x as usize]] = pixel[0] as f64;
    }

    arr
}

/// A tile of the block grid. Tiles on the last row/column may be smaller
/// than the nominal block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Non-overlapping `size x size` tiling of a `width x height` image, clipped
/// at the right and bottom edges.
#[derive(Debug, Clone, Copy)]
pub struct BlockGrid {
    width: u32,
    height: u32,
    size: u32,
}

impl BlockGrid {
    pub fn new(width: u32, height: u32, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(ForensicsError::InvalidParameter(
                "Block size must be greater than zero".into(),
            ));
        }

        Ok(Self { width, height, size })
    }

    pub fn columns(&self) -> u32 {
        self.width.div_ceil(self.size)
    }

    pub fn rows(&self) -> u32 {
        self.height.div_ceil(self.size)
    }

    pub fn len(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks in row-major order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        (0..self.rows()).flat_map(move |row| {
            (0..self.columns()).map(move |col| {
                let x = col * self.size;
                let y = row * self.size;
                Block {
                    x,
                    y,
                    width: self.size.min(self.width - x),
                    height: self.size.min(self.height - y),
                }
            })
        })
    }
}

pub fn block_view<'a>(arr: &'a Array2<f64>, block: &Block) -> ArrayView2<'a, f64> {
    let (x0, y0) = (block.x as usize, block.y as usize);
    let (x1, y1) = (x0 + block.width as usize, y0 + block.height as usize);
    arr.slice(s![y0..y1, x0..x1])
}

pub fn block_mean(view: &ArrayView2<f64>) -> f64 {
    view.mean().unwrap_or(0.0)
}

/// Population variance of a block.
pub fn block_variance(view: &ArrayView2<f64>) -> f64 {
    if view.is_empty() {
        return 0.0;
    }
    view.var(0.0)
}

/// Min-max normalisation into `[0, 1)`, epsilon-protected.
pub fn normalize_min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min + NORMALIZE_EPSILON;

    values.iter().map(|v| (v - min) / range).collect()
}

/// Paints each block with its normalised value scaled to `0..=255`.
pub fn paint_blocks(grid: &BlockGrid, values: &[f64], width: u32, height: u32) -> RgbImage {
    let mut canvas = GrayImage::new(width, height);

    for (block, &value) in grid.blocks().zip(values) {
        let level = (255.0 * value).clamp(0.0, 255.0) as u8;
        for y in block.y..block.y + block.height {
            for x in block.x..block.x + block.width {
                canvas.put_pixel(x, y, Luma([level]));
            }
        }
    }

    gray_to_rgb(&canvas)
}
