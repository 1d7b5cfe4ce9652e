//! Small-angle skew correction from straight-line geometry.
//!
//! Edges (Sobel) → Hough lines → keep near-horizontal ones → median
//! angle → rotate by the negated median on an expanded canvas with
//! edge-replicated borders. No lines means no correction.

use image::GrayImage;
use tracing::{debug, info};

use super::decode::downscale_for_analysis;
use super::types::{PixelBuffer, SkewEstimate};

/// Tunables for line detection and correction.
#[derive(Debug, Clone)]
pub struct SkewConfig {
    /// Longest edge of the analysis copy. Angles are scale-invariant.
    pub analysis_max_dimension: u32,
    /// Sobel magnitude at or above which a pixel counts as an edge.
    pub edge_threshold: f32,
    /// Hough angular resolution in degrees.
    pub angle_step_degrees: f32,
    /// Minimum votes as a fraction of the analysis width.
    pub min_votes_ratio: f32,
    /// Absolute vote floor for tiny images.
    pub min_votes: u32,
    /// Peaks closer than this in angle (degrees) ...
    pub suppression_angle_degrees: f32,
    /// ... and this in distance (pixels) are the same line.
    pub suppression_rho: f32,
    pub max_lines: usize,
    /// Estimates smaller than this (degrees) are not worth resampling.
    pub min_correction_degrees: f32,
}

impl SkewConfig {
    /// Whether `estimate` leads to resampling the page.
    pub fn corrects(&self, estimate: &SkewEstimate) -> bool {
        estimate.is_defined() && estimate.angle_degrees.abs() >= self.min_correction_degrees
    }
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self {
            analysis_max_dimension: 1200,
            edge_threshold: 128.0,
            angle_step_degrees: 0.25,
            min_votes_ratio: 0.3,
            min_votes: 30,
            suppression_angle_degrees: 2.0,
            suppression_rho: 10.0,
            max_lines: 25,
            min_correction_degrees: 0.05,
        }
    }
}

/// A straight line in normal form: `rho = -x·sin(angle) + y·cos(angle)`,
/// `angle` measured from the x-axis, clockwise on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughLine {
    pub angle_degrees: f32,
    pub rho: f32,
    pub votes: u32,
}

impl HoughLine {
    /// Strictly between -45° and 45°.
    pub fn is_near_horizontal(&self) -> bool {
        self.angle_degrees > -45.0 && self.angle_degrees < 45.0
    }
}

// ═══════════════════════════════════════════════════════════
// Edge map
// ═══════════════════════════════════════════════════════════

/// Coordinates of pixels whose Sobel gradient magnitude reaches `threshold`.
/// The one-pixel border is never an edge.
pub fn sobel_edge_points(img: &GrayImage, threshold: f32) -> Vec<(u32, u32)> {
    let (w, h) = (img.width(), img.height());
    let mut points = Vec::new();
    if w < 3 || h < 3 {
        return points;
    }

    let px = |x: u32, y: u32| f32::from(img.get_pixel(x, y).0[0]);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            let gy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
            if (gx * gx + gy * gy).sqrt() >= threshold {
                points.push((x, y));
            }
        }
    }
    points
}

// ═══════════════════════════════════════════════════════════
// Hough transform
// ═══════════════════════════════════════════════════════════

/// Standard Hough transform over angles in [-90°, 90°), returning the
/// strongest distinct lines, strongest first.
pub fn detect_lines(img: &GrayImage, config: &SkewConfig) -> Vec<HoughLine> {
    let points = sobel_edge_points(img, config.edge_threshold);
    if points.is_empty() || config.angle_step_degrees <= 0.0 {
        return Vec::new();
    }

    let (w, h) = (img.width() as f32, img.height() as f32);
    let diag = (w * w + h * h).sqrt().ceil() as usize;
    let n_rho = 2 * diag + 1;
    let n_angles = (180.0 / config.angle_step_degrees).round().max(1.0) as usize;

    let angles: Vec<f32> = (0..n_angles)
        .map(|i| -90.0 + i as f32 * config.angle_step_degrees)
        .collect();
    let trig: Vec<(f32, f32)> = angles
        .iter()
        .map(|a| {
            let r = a.to_radians();
            (r.sin(), r.cos())
        })
        .collect();

    let mut accumulator = vec![0u32; n_angles * n_rho];
    for &(x, y) in &points {
        let (x, y) = (x as f32, y as f32);
        for (i, &(sin, cos)) in trig.iter().enumerate() {
            let rho = -x * sin + y * cos;
            let idx = (rho + diag as f32).round();
            if idx >= 0.0 && (idx as usize) < n_rho {
                accumulator[i * n_rho + idx as usize] += 1;
            }
        }
    }

    let min_votes = ((config.min_votes_ratio * w).round() as u32).max(config.min_votes);
    let mut peaks: Vec<(u32, usize)> = accumulator
        .iter()
        .enumerate()
        .filter(|(_, &votes)| votes >= min_votes)
        .map(|(cell, &votes)| (votes, cell))
        .collect();
    // Strongest first; cell index keeps the order deterministic.
    peaks.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut lines: Vec<HoughLine> = Vec::new();
    for (votes, cell) in peaks {
        if lines.len() >= config.max_lines {
            break;
        }
        let candidate = HoughLine {
            angle_degrees: angles[cell / n_rho],
            rho: (cell % n_rho) as f32 - diag as f32,
            votes,
        };
        let duplicate = lines.iter().any(|l| {
            (l.angle_degrees - candidate.angle_degrees).abs() < config.suppression_angle_degrees
                && (l.rho - candidate.rho).abs() < config.suppression_rho
        });
        if !duplicate {
            lines.push(candidate);
        }
    }

    debug!(
        edge_points = points.len(),
        min_votes,
        lines = lines.len(),
        "Hough line detection complete"
    );
    lines
}

/// Median of the values; mean of the two middle values for even counts.
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Estimate page skew as the median angle of near-horizontal lines.
pub fn estimate_skew(image: &PixelBuffer, config: &SkewConfig) -> SkewEstimate {
    if image.is_degenerate() {
        return SkewEstimate::none();
    }

    let gray = image.to_gray();
    let analysis = downscale_for_analysis(&gray, config.analysis_max_dimension);

    let mut angles: Vec<f32> = detect_lines(&analysis, config)
        .into_iter()
        .filter(HoughLine::is_near_horizontal)
        .map(|l| l.angle_degrees)
        .collect();

    match median(&mut angles) {
        Some(angle_degrees) => SkewEstimate {
            angle_degrees,
            evidence_count: angles.len(),
        },
        None => SkewEstimate::none(),
    }
}

// ═══════════════════════════════════════════════════════════
// Rotation
// ═══════════════════════════════════════════════════════════

/// Rotate clockwise (on screen) by `degrees` about the center.
///
/// The canvas grows to the bounding box of the rotated source; pixels
/// outside the source replicate its nearest edge. Bilinear sampling.
pub fn rotate_expanded(image: &PixelBuffer, degrees: f32) -> PixelBuffer {
    let src = image.as_rgb();
    let (w, h) = (src.width(), src.height());
    if w == 0 || h == 0 {
        return image.clone();
    }

    let theta = degrees.to_radians();
    let (sin, cos) = (theta.sin(), theta.cos());

    // Tolerance keeps exact multiples of 90° from gaining a pixel.
    let new_w = ((w as f32 * cos.abs() + h as f32 * sin.abs()) - 1e-3).ceil().max(1.0) as u32;
    let new_h = ((w as f32 * sin.abs() + h as f32 * cos.abs()) - 1e-3).ceil().max(1.0) as u32;

    let (src_cx, src_cy) = ((w as f32 - 1.0) / 2.0, (h as f32 - 1.0) / 2.0);
    let (dst_cx, dst_cy) = ((new_w as f32 - 1.0) / 2.0, (new_h as f32 - 1.0) / 2.0);
    let (max_x, max_y) = ((w - 1) as f32, (h - 1) as f32);

    let mut out = image::RgbImage::new(new_w, new_h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f32 - dst_cx;
        let dy = y as f32 - dst_cy;
        // Inverse mapping: rotate the destination point back by -theta.
        let sx = (cos * dx + sin * dy + src_cx).clamp(0.0, max_x);
        let sy = (-sin * dx + cos * dy + src_cy).clamp(0.0, max_y);

        let (x0, y0) = (sx.floor() as u32, sy.floor() as u32);
        let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
        let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);

        let p00 = src.get_pixel(x0, y0).0;
        let p10 = src.get_pixel(x1, y0).0;
        let p01 = src.get_pixel(x0, y1).0;
        let p11 = src.get_pixel(x1, y1).0;

        for c in 0..3 {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            pixel.0[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
    }

    PixelBuffer::new(out)
}

/// Estimate and undo skew. Without evidence the input comes back as is.
pub fn deskew(image: PixelBuffer, config: &SkewConfig) -> (PixelBuffer, SkewEstimate) {
    let estimate = estimate_skew(&image, config);
    if !estimate.is_defined() {
        debug!("No near-horizontal lines found; skew correction skipped");
        return (image, estimate);
    }
    if !config.corrects(&estimate) {
        debug!(angle = estimate.angle_degrees, "Skew negligible; image kept");
        return (image, estimate);
    }

    info!(
        angle = estimate.angle_degrees,
        lines = estimate.evidence_count,
        "Correcting skew"
    );
    let corrected = rotate_expanded(&image, -estimate.angle_degrees);
    (corrected, estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn white(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    /// Dark stripes descending to the right at `degrees`.
    fn tilted_stripes(degrees: f32) -> PixelBuffer {
        let mut img = white(400, 300);
        let slope = degrees.to_radians().tan();
        for y0 in [60.0f32, 110.0, 160.0, 210.0, 260.0] {
            for x in 40..360u32 {
                let yc = (y0 + (x as f32 - 200.0) * slope).round() as i64;
                for dy in 0..4 {
                    let y = yc + dy;
                    if (0..300).contains(&y) {
                        img.put_pixel(x, y as u32, Rgb([0, 0, 0]));
                    }
                }
            }
        }
        PixelBuffer::new(img)
    }

    #[test]
    fn median_handles_odd_and_even_counts() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn near_horizontal_bounds_are_strict() {
        let line = |angle_degrees| HoughLine { angle_degrees, rho: 0.0, votes: 1 };
        assert!(line(44.75).is_near_horizontal());
        assert!(line(-44.75).is_near_horizontal());
        assert!(!line(45.0).is_near_horizontal());
        assert!(!line(-45.0).is_near_horizontal());
        assert!(!line(-90.0).is_near_horizontal());
    }

    #[test]
    fn blank_page_is_returned_untouched() {
        let blank = PixelBuffer::new(white(120, 80));
        let original = blank.as_raw().to_vec();

        let (out, estimate) = deskew(blank, &SkewConfig::default());
        assert!(!estimate.is_defined());
        assert_eq!(estimate.evidence_count, 0);
        assert_eq!((out.width(), out.height()), (120, 80));
        assert_eq!(out.as_raw(), original.as_slice());
    }

    #[test]
    fn vertical_lines_are_not_skew_evidence() {
        let mut img = white(200, 150);
        for x0 in [40u32, 90, 140] {
            for x in x0..x0 + 5 {
                for y in 0..150 {
                    img.put_pixel(x, y, Rgb([0, 0, 0]));
                }
            }
        }
        let estimate = estimate_skew(&PixelBuffer::new(img), &SkewConfig::default());
        assert!(!estimate.is_defined());
    }

    #[test]
    fn tilted_lines_estimate_their_angle() {
        let page = tilted_stripes(3.0);
        let estimate = estimate_skew(&page, &SkewConfig::default());
        assert!(estimate.is_defined());
        assert!(
            (estimate.angle_degrees - 3.0).abs() < 0.75,
            "estimated {}",
            estimate.angle_degrees
        );
    }

    #[test]
    fn deskew_levels_tilted_lines() {
        let config = SkewConfig::default();
        let (corrected, estimate) = deskew(tilted_stripes(3.0), &config);
        assert!(estimate.is_defined());
        assert!(corrected.width() > 400 && corrected.height() > 300);

        let residual = estimate_skew(&corrected, &config);
        assert!(residual.is_defined());
        assert!(
            residual.angle_degrees.abs() < 0.75,
            "residual {}",
            residual.angle_degrees
        );
    }

    #[test]
    fn rotation_expands_canvas() {
        let buffer = PixelBuffer::new(white(100, 50));
        let same = rotate_expanded(&buffer, 0.0);
        assert_eq!((same.width(), same.height()), (100, 50));
        assert_eq!(same.as_raw(), buffer.as_raw());

        let quarter = rotate_expanded(&buffer, 90.0);
        assert_eq!((quarter.width(), quarter.height()), (50, 100));

        let tilted = rotate_expanded(&buffer, 10.0);
        let rad = 10f32.to_radians();
        let expected_w = (100.0 * rad.cos() + 50.0 * rad.sin()).ceil() as u32;
        assert_eq!(tilted.width(), expected_w);
    }

    #[test]
    fn borders_replicate_edges() {
        let gray = PixelBuffer::new(RgbImage::from_pixel(60, 40, Rgb([120, 130, 140])));
        let rotated = rotate_expanded(&gray, -7.5);
        assert!(rotated.as_rgb().pixels().all(|p| p.0 == [120, 130, 140]));
    }
}
