//! Pupil localization inside an eye crop

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::filter::gaussian_blur_f32;
use imageproc::map::map_colors;

use crate::geometry::Point;

/// Pixels at or below this intensity are treated as pupil
pub const PUPIL_THRESHOLD: u8 = 70;

/// Sigma of a 5x5 Gaussian kernel with automatic sigma (0.3 * ((5 - 1) * 0.5 - 1) + 0.8)
const BLUR_SIGMA: f32 = 1.1;

/// Locate the pupil center in eye-local coordinates.
///
/// Falls back to the geometric center of the region when no dark blob is
/// found, so a missed pupil reads as "looking straight ahead".
pub fn locate_pupil(eye: &GrayImage) -> Point {
    let (width, height) = eye.dimensions();
    let center = Point::new(width as f64 / 2.0, height as f64 / 2.0);
    if width == 0 || height == 0 {
        return center;
    }

    let blurred = gaussian_blur_f32(eye, BLUR_SIGMA);
    let mask = map_colors(&blurred, |p| {
        if p[0] > PUPIL_THRESHOLD {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let contours = find_contours::<i32>(&mask);
    let mut best: Option<(f64, &Contour<i32>)> = None;
    for contour in contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
    {
        let area = PolygonMoments::of(contour).m00.abs();
        if best.map_or(true, |(max, _)| area > max) {
            best = Some((area, contour));
        }
    }

    match best {
        Some((_, contour)) => centroid(contour),
        None => center,
    }
}

/// Zeroth and first order moments of a closed polygon (Green's theorem)
#[derive(Debug, Clone, Copy, Default)]
struct PolygonMoments {
    m00: f64,
    m10: f64,
    m01: f64,
}

impl PolygonMoments {
    fn of(contour: &Contour<i32>) -> Self {
        let points = &contour.points;
        let n = points.len();
        if n < 3 {
            return Self::default();
        }

        let (mut a00, mut a10, mut a01) = (0.0, 0.0, 0.0);
        for i in 0..n {
            let p = points[(i + n - 1) % n];
            let q = points[i];
            let (x0, y0) = (p.x as f64, p.y as f64);
            let (x1, y1) = (q.x as f64, q.y as f64);
            let cross = x0 * y1 - x1 * y0;
            a00 += cross;
            a10 += cross * (x0 + x1);
            a01 += cross * (y0 + y1);
        }

        let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
        Self {
            m00: sign * a00 / 2.0,
            m10: sign * a10 / 6.0,
            m01: sign * a01 / 6.0,
        }
    }
}

/// Centroid via M10/M00, M01/M00.
///
/// Blobs too thin to enclose area (a single pixel or a line) use the mean
/// of their border points.
fn centroid(contour: &Contour<i32>) -> Point {
    let moments = PolygonMoments::of(contour);
    if moments.m00 > f64::EPSILON {
        return Point::new(moments.m10 / moments.m00, moments.m01 / moments.m00);
    }

    let n = contour.points.len().max(1) as f64;
    let (sx, sy) = contour
        .points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
    Point::new(sx / n, sy / n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eye_with_disc(width: u32, height: u32, cx: i32, cy: i32, r: i32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let dx = x as i32 - cx;
            let dy = y as i32 - cy;
            if dx * dx + dy * dy <= r * r {
                Luma([10])
            } else {
                Luma([220])
            }
        })
    }

    #[test]
    fn test_finds_dark_disc() {
        let eye = eye_with_disc(40, 30, 28, 15, 5);
        let pupil = locate_pupil(&eye);
        assert!((pupil.x - 28.0).abs() < 1.0, "x = {}", pupil.x);
        assert!((pupil.y - 15.0).abs() < 1.0, "y = {}", pupil.y);
    }

    #[test]
    fn test_prefers_largest_blob() {
        let mut eye = eye_with_disc(60, 30, 40, 15, 7);
        // small speck elsewhere
        for y in 3..6 {
            for x in 3..6 {
                eye.put_pixel(x, y, Luma([0]));
            }
        }
        let pupil = locate_pupil(&eye);
        assert!((pupil.x - 40.0).abs() < 1.0);
        assert!((pupil.y - 15.0).abs() < 1.0);
    }

    #[test]
    fn test_bright_eye_falls_back_to_center() {
        let eye = GrayImage::from_pixel(30, 20, Luma([200]));
        assert_eq!(locate_pupil(&eye), Point::new(15.0, 10.0));
    }

    #[test]
    fn test_empty_region_falls_back_to_center() {
        let eye = GrayImage::new(0, 0);
        assert_eq!(locate_pupil(&eye), Point::new(0.0, 0.0));
    }

    #[test]
    fn test_square_moments() {
        let mut mask = GrayImage::new(12, 12);
        for y in 2..8 {
            for x in 4..10 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let contours = find_contours::<i32>(&mask);
        let outer = contours
            .iter()
            .find(|c| c.border_type == BorderType::Outer)
            .unwrap();
        let c = centroid(outer);
        assert!((c.x - 6.5).abs() < 1e-9);
        assert!((c.y - 4.5).abs() < 1e-9);
    }
}
