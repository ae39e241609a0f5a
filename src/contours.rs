use crate::EPS;
use geo::{Area, BoundingRect, Coord, Intersects, LineString, Polygon, Simplify};
use image::GrayImage;
use imageproc::point::Point;
use itertools::Itertools;
use rayon::prelude::*;

/// Names of the exported feature columns, in output order
pub const FEATURES: [&str; 8] = [
    "timestamp",
    "frame",
    "id",
    "x",
    "y",
    "area",
    "orientation",
    "mean_value",
];

/// Spatial moments of a polygon up to the second order
///
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
}

/// Closed border of a connected region, in pixel coordinates
///
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<Point<i32>>,
    /// Index of the enclosing contour within the same contour list
    pub parent: Option<usize>,
    /// The contour is the border of a hole
    pub hole: bool,
}

impl Contour {
    pub fn new(points: Vec<Point<i32>>) -> Self {
        Self {
            points,
            parent: None,
            hole: false,
        }
    }

    pub fn from_coords(coords: &[(i32, i32)]) -> Self {
        Self::new(coords.iter().map(|(x, y)| Point::new(*x, *y)).collect())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(
                self.points
                    .iter()
                    .map(|p| Coord {
                        x: p.x as f64,
                        y: p.y as f64,
                    })
                    .collect::<Vec<_>>(),
            ),
            vec![],
        )
    }

    /// Enclosed area, independent of the orientation of the border
    ///
    pub fn area(&self) -> f64 {
        self.polygon().unsigned_area()
    }

    /// Polygon moments computed with Green's theorem over the border
    ///
    pub fn moments(&self) -> Moments {
        let mut m = Moments::default();
        if self.points.len() < 3 {
            return m;
        }

        for (p, q) in self.points.iter().circular_tuple_windows() {
            let (xi, yi) = (p.x as f64, p.y as f64);
            let (xj, yj) = (q.x as f64, q.y as f64);
            let a = xi * yj - xj * yi;
            m.m00 += a;
            m.m10 += a * (xi + xj);
            m.m01 += a * (yi + yj);
            m.m20 += a * (xi * xi + xi * xj + xj * xj);
            m.m11 += a * (2.0 * xi * yi + xi * yj + xj * yi + 2.0 * xj * yj);
            m.m02 += a * (yi * yi + yi * yj + yj * yj);
        }

        let sign = if m.m00 < 0.0 { -1.0 } else { 1.0 };
        Moments {
            m00: sign * m.m00 / 2.0,
            m10: sign * m.m10 / 6.0,
            m01: sign * m.m01 / 6.0,
            m20: sign * m.m20 / 12.0,
            m11: sign * m.m11 / 24.0,
            m02: sign * m.m02 / 12.0,
        }
    }

    /// Centre of mass of the enclosed area. Degenerate contours (lines, single points)
    /// use the mean of their points.
    ///
    pub fn centroid(&self) -> (f64, f64) {
        let m = self.moments();
        if m.m00.abs() > EPS {
            (m.m10 / m.m00, m.m01 / m.m00)
        } else {
            let n = self.points.len().max(1) as f64;
            let (sx, sy) = self
                .points
                .iter()
                .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
            (sx / n, sy / n)
        }
    }

    /// Angle of the major axis in radians, in `(-pi/2, pi/2]`, measured from the x axis
    /// towards the y axis (image coordinates).
    ///
    /// `None` for zero-area contours and for shapes without a dominant axis.
    ///
    pub fn orientation(&self) -> Option<f64> {
        let m = self.moments();
        if m.m00.abs() <= EPS {
            return None;
        }
        let (cx, cy) = (m.m10 / m.m00, m.m01 / m.m00);
        let mu20 = m.m20 / m.m00 - cx * cx;
        let mu02 = m.m02 / m.m00 - cy * cy;
        let mu11 = m.m11 / m.m00 - cx * cy;
        if mu11.abs() <= EPS && (mu20 - mu02).abs() <= EPS {
            return None;
        }
        Some(0.5 * (2.0 * mu11).atan2(mu20 - mu02))
    }

    /// Inclusive pixel bounds as (min_x, min_y, max_x, max_y)
    ///
    pub fn bounds(&self) -> Option<(i32, i32, i32, i32)> {
        let (first, rest) = self.points.split_first()?;
        Some(rest.iter().fold(
            (first.x, first.y, first.x, first.y),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        ))
    }

    /// Mean intensity of the pixels whose centres lie inside or on the contour
    ///
    pub fn mean_value(&self, image: &GrayImage) -> Option<f64> {
        let polygon = self.polygon();
        let rect = polygon.bounding_rect()?;
        let (width, height) = image.dimensions();
        let x0 = rect.min().x.floor().max(0.0) as u32;
        let y0 = rect.min().y.floor().max(0.0) as u32;
        let x1 = (rect.max().x.ceil() as i64).min(width as i64 - 1);
        let y1 = (rect.max().y.ceil() as i64).min(height as i64 - 1);
        if x1 < 0 || y1 < 0 {
            return None;
        }

        let (mut sum, mut count) = (0.0, 0usize);
        for y in y0..=y1 as u32 {
            for x in x0..=x1 as u32 {
                if polygon.intersects(&geo::Point::new(x as f64, y as f64)) {
                    sum += image.get_pixel(x, y)[0] as f64;
                    count += 1;
                }
            }
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }

    /// Removes the points that lie in the middle of horizontal, vertical or diagonal runs
    ///
    pub fn compress_segments(&self) -> Self {
        if self.points.len() < 3 {
            return self.clone();
        }
        let n = self.points.len();
        let points = (0..n)
            .filter(|&i| {
                let prev = self.points[(i + n - 1) % n];
                let cur = self.points[i];
                let next = self.points[(i + 1) % n];
                let d1 = ((cur.x - prev.x).signum(), (cur.y - prev.y).signum());
                let d2 = ((next.x - cur.x).signum(), (next.y - cur.y).signum());
                d1 != d2
            })
            .map(|i| self.points[i])
            .collect::<Vec<_>>();
        Self {
            points: if points.is_empty() {
                self.points.clone()
            } else {
                points
            },
            ..self.clone()
        }
    }

    /// Douglas-Peucker simplification of the border
    ///
    pub fn simplify(&self, epsilon: f64) -> Self {
        if self.points.len() < 3 {
            return self.clone();
        }
        let mut points = self
            .polygon()
            .exterior()
            .simplify(&epsilon)
            .coords()
            .map(|c| Point::new(c.x.round() as i32, c.y.round() as i32))
            .collect::<Vec<_>>();
        // drop the closing point
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        Self {
            points,
            ..self.clone()
        }
    }
}

/// Features of one segmented object in one frame
///
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub frame: usize,
    /// Milliseconds
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub area: f64,
    pub orientation: Option<f64>,
    pub mean_value: Option<f64>,
    pub contour: Contour,
}

impl Detection {
    pub fn from_contour(
        frame: usize,
        timestamp: f64,
        contour: &Contour,
        gray: Option<&GrayImage>,
    ) -> Self {
        let (x, y) = contour.centroid();
        Self {
            frame,
            timestamp,
            x,
            y,
            area: contour.area(),
            orientation: contour.orientation(),
            mean_value: gray.and_then(|g| contour.mean_value(g)),
            contour: contour.clone(),
        }
    }
}

/// Builds one detection per contour, in input order
///
/// # Parameters
/// * `frame` - index of the frame the contours were extracted from
/// * `timestamp` - timestamp of the frame in milliseconds
/// * `contours` - contours to describe
/// * `gray` - grayscale frame used for `mean_value`; without it the value is left empty
///
pub fn extract_features(
    frame: usize,
    timestamp: f64,
    contours: &[Contour],
    gray: Option<&GrayImage>,
) -> Vec<Detection> {
    contours
        .par_iter()
        .map(|c| Detection::from_contour(frame, timestamp, c, gray))
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::contours::{extract_features, Contour};
    use image::{GrayImage, Luma};
    use std::f64::consts::FRAC_PI_4;

    fn square() -> Contour {
        Contour::from_coords(&[(0, 0), (10, 0), (10, 10), (0, 10)])
    }

    #[test]
    fn area_and_centroid() {
        let c = square();
        assert!((c.area() - 100.0).abs() < 1e-9);
        let (x, y) = c.centroid();
        assert!((x - 5.0).abs() < 1e-9 && (y - 5.0).abs() < 1e-9);

        // reversed orientation gives the same values
        let mut r = c.clone();
        r.points.reverse();
        assert!((r.area() - 100.0).abs() < 1e-9);
        assert!((r.moments().m00 - 100.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_contours() {
        let line = Contour::from_coords(&[(0, 0), (4, 0)]);
        assert_eq!(line.area(), 0.0);
        assert_eq!(line.centroid(), (2.0, 0.0));
        assert_eq!(line.orientation(), None);

        let point = Contour::from_coords(&[(3, 7)]);
        assert_eq!(point.centroid(), (3.0, 7.0));
        assert_eq!(point.bounds(), Some((3, 7, 3, 7)));
        assert_eq!(Contour::new(vec![]).bounds(), None);
    }

    #[test]
    fn orientation() {
        assert_eq!(square().orientation(), None);

        let horizontal = Contour::from_coords(&[(0, 0), (20, 0), (20, 4), (0, 4)]);
        assert!(horizontal.orientation().unwrap().abs() < 1e-9);

        let vertical = Contour::from_coords(&[(0, 0), (4, 0), (4, 20), (0, 20)]);
        assert!((vertical.orientation().unwrap().abs() - 2.0 * FRAC_PI_4).abs() < 1e-9);

        let diagonal = Contour::from_coords(&[(0, 2), (2, 0), (22, 20), (20, 22)]);
        assert!((diagonal.orientation().unwrap() - FRAC_PI_4).abs() < 1e-6);
    }

    #[test]
    fn mean_value() {
        let mut img = GrayImage::from_pixel(20, 20, Luma([100]));
        for y in 0..=10 {
            for x in 0..=10 {
                img.put_pixel(x, y, Luma([10]));
            }
        }
        let c = square();
        assert!((c.mean_value(&img).unwrap() - 10.0).abs() < 1e-9);

        let outside = Contour::from_coords(&[(-10, -10), (-5, -10), (-5, -5)]);
        assert_eq!(outside.mean_value(&img), None);
    }

    #[test]
    fn compress_segments() {
        let mut coords = vec![];
        for x in 0..5 {
            coords.push((x, 0));
        }
        for y in 1..5 {
            coords.push((4, y));
        }
        for x in (0..4).rev() {
            coords.push((x, 4));
        }
        for y in (1..4).rev() {
            coords.push((0, y));
        }
        let c = Contour::from_coords(&coords).compress_segments();
        assert_eq!(
            c,
            Contour::from_coords(&[(0, 0), (4, 0), (4, 4), (0, 4)])
        );
    }

    #[test]
    fn simplify() {
        let c = Contour::from_coords(&[(0, 0), (5, 0), (10, 0), (10, 10), (5, 10), (0, 10)])
            .simplify(1.0);
        assert_eq!(c.len(), 4);
        assert!((c.area() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn features() {
        let img = GrayImage::from_pixel(30, 30, Luma([50]));
        let contours = vec![square(), Contour::from_coords(&[(20, 20), (24, 20), (24, 24), (20, 24)])];
        let d = extract_features(7, 280.0, &contours, Some(&img));
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].frame, 7);
        assert_eq!(d[0].timestamp, 280.0);
        assert!((d[1].x - 22.0).abs() < 1e-9);
        assert!((d[1].area - 16.0).abs() < 1e-9);
        assert_eq!(d[1].mean_value, Some(50.0));

        let d = extract_features(0, 0.0, &contours, None);
        assert_eq!(d[0].mean_value, None);
    }
}
