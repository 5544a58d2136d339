use image::{DynamicImage, GenericImageView, Rgba, RgbImage};

use crate::{
    error::{Error, Result},
    haar::{ImageData, NUM_PIXELS},
};

fn rgb_to_yiq(r: f64, g: f64, b: f64) -> [f64; 3] {
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let i = 0.596 * r - 0.275 * g - 0.321 * b;
    let q = 0.212 * r - 0.523 * g + 0.311 * b;
    [y, i, q]
}

/// Length of `[lo, hi)` covered by the source cell `[cell, cell + 1)`.
fn overlap(lo: f64, hi: f64, cell: u32) -> f64 {
    let start = lo.max(cell as f64);
    let end = hi.min(cell as f64 + 1.0);
    (end - start).max(0.0)
}

/// Source cells touched by output cell `out` when `src` cells map onto
/// [`NUM_PIXELS`] output cells.
fn span(out: usize, src: u32) -> (f64, f64, u32, u32) {
    let lo = out as f64 * src as f64 / NUM_PIXELS as f64;
    let hi = (out + 1) as f64 * src as f64 / NUM_PIXELS as f64;
    let first = lo.floor() as u32;
    let last = (hi.ceil() as u32).min(src);
    (lo, hi, first, last)
}

/// Area averaging resample of any RGBA view to the fixed 128x128 YIQ planes.
///
/// Each output cell is the coverage weighted mean of the source pixels it
/// overlaps, so large sources are box filtered and sources smaller than
/// 128x128 are blown up by replicating (and blending at cell seams) their
/// pixels. Alpha scales a pixel's contribution; a fully transparent cell
/// falls back to plain coverage weights.
pub fn sample<I>(img: &I) -> Result<ImageData>
where
    I: GenericImageView<Pixel = Rgba<u8>>,
{
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::UnsupportedInput(format!(
            "image has zero area ({width}x{height})"
        )));
    }

    let columns: Vec<_> = (0..NUM_PIXELS).map(|x| span(x, width)).collect();

    Ok(ImageData::from_fn(|x, y| {
        let (sy1, sy2, first_y, last_y) = span(y, height);
        let (sx1, sx2, first_x, last_x) = columns[x];

        let mut weighted = [0.0; 3];
        let mut alpha_sum = 0.0;
        let mut plain = [0.0; 3];
        let mut contrib_sum = 0.0;

        for sy in first_y..last_y {
            let yportion = overlap(sy1, sy2, sy);
            for sx in first_x..last_x {
                let contribution = overlap(sx1, sx2, sx) * yportion;
                if contribution == 0.0 {
                    continue;
                }
                let Rgba([r, g, b, a]) = img.get_pixel(sx, sy);
                let alpha_factor = contribution * a as f64 / 255.0;
                for (channel, value) in [r, g, b].into_iter().enumerate() {
                    weighted[channel] += value as f64 * alpha_factor;
                    plain[channel] += value as f64 * contribution;
                }
                alpha_sum += alpha_factor;
                contrib_sum += contribution;
            }
        }

        let [red, green, blue] = if alpha_sum > 0.0 {
            weighted.map(|v| v / alpha_sum)
        } else if contrib_sum > 0.0 {
            plain.map(|v| v / contrib_sum)
        } else {
            [0.0; 3]
        };
        rgb_to_yiq(red, green, blue)
    }))
}

/// Samples a raw interleaved 8-bit RGB buffer handed over by an external
/// decoder.
pub fn sample_rgb(width: u32, height: u32, pixels: &[u8]) -> Result<ImageData> {
    if width == 0 || height == 0 {
        return Err(Error::UnsupportedInput(format!(
            "image has zero area ({width}x{height})"
        )));
    }
    let mismatch = || {
        Error::UnsupportedInput(format!(
            "buffer of {} bytes is not a {width}x{height} RGB image",
            pixels.len()
        ))
    };
    if pixels.len() as u64 != width as u64 * height as u64 * 3 {
        return Err(mismatch());
    }
    let img = RgbImage::from_raw(width, height, pixels.to_vec()).ok_or_else(mismatch)?;
    sample(&DynamicImage::ImageRgb8(img))
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbaImage};

    use super::*;
    use crate::haar::NUM_PIXELS_SQUARED;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn always_128_square() {
        for (w, h) in [(1, 1), (3, 7), (128, 128), (300, 97), (1024, 16)] {
            let data = sample(&solid(w, h, [10, 20, 30])).unwrap();
            for channel in 0..3 {
                assert_eq!(data.channel(channel).len(), NUM_PIXELS_SQUARED);
            }
        }
    }

    #[test]
    fn zero_area_is_unsupported() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 5));
        assert!(matches!(sample(&img), Err(Error::UnsupportedInput(_))));
    }

    #[test]
    fn solid_color_stays_solid() {
        let data = sample(&solid(256, 256, [200, 100, 50])).unwrap();
        let expected = rgb_to_yiq(200.0, 100.0, 50.0);
        for (channel, &value) in expected.iter().enumerate() {
            assert!(data.channel(channel).iter().all(|&v| v == value));
        }
    }

    #[test]
    fn downsample_averages_blocks() {
        // 256 wide: every output cell averages one black and one white column.
        let img = RgbImage::from_fn(256, 128, |x, _| {
            if x % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let data = sample(&DynamicImage::ImageRgb8(img)).unwrap();
        let expected = rgb_to_yiq(127.5, 127.5, 127.5)[0];
        assert!(data.channel(0).iter().all(|&v| (v - expected).abs() < 1e-9));
    }

    #[test]
    fn upsample_replicates() {
        let img = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let data = sample(&DynamicImage::ImageRgb8(img)).unwrap();
        let white = rgb_to_yiq(255.0, 255.0, 255.0)[0];
        let y = data.channel(0);
        assert!((y[0] - white).abs() < 1e-9);
        assert!(y[NUM_PIXELS - 1].abs() < 1e-9);
    }

    #[test]
    fn transparent_pixels_do_not_contribute() {
        let img = RgbaImage::from_fn(256, 256, |x, _| {
            if x % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 0])
            }
        });
        let data = sample(&img).unwrap();
        let red = rgb_to_yiq(255.0, 0.0, 0.0);
        assert!((data.channel(0)[0] - red[0]).abs() < 1e-9);
        assert!((data.channel(1)[0] - red[1]).abs() < 1e-9);
    }

    #[test]
    fn raw_rgb_buffer() {
        let pixels = vec![128u8; 4 * 4 * 3];
        assert!(sample_rgb(4, 4, &pixels).is_ok());
        assert!(matches!(
            sample_rgb(4, 5, &pixels),
            Err(Error::UnsupportedInput(_))
        ));
        assert!(matches!(
            sample_rgb(0, 4, &pixels),
            Err(Error::UnsupportedInput(_))
        ));
    }
}
