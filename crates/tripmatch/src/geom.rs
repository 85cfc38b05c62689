//! Planar geometry helpers shared by the matcher and the locators.
//!
//! Everything downstream of the feed works in a local planar projection with
//! meters on both axes, so distances and measures stay plain Euclidean math.

use geo::{Coord, EuclideanLength, LineString, MultiLineString, Point, Simplify};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic to local planar projection around a fixed origin.
///
/// An equirectangular projection is accurate to well under a meter at the
/// scale of a single trip, which is all the pipeline needs.
#[derive(Debug, Clone, Copy)]
pub struct Projector {
    origin: Coord<f64>,
    x_scale: f64,
    y_scale: f64,
}

impl Projector {
    #[must_use]
    pub fn new(origin_longitude: f64, origin_latitude: f64) -> Self {
        let meters_per_degree = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        Self {
            origin: Coord { x: origin_longitude, y: origin_latitude },
            x_scale: meters_per_degree * origin_latitude.to_radians().cos(),
            y_scale: meters_per_degree,
        }
    }

    #[must_use]
    pub fn project(&self, longitude: f64, latitude: f64) -> Point<f64> {
        Point::new(
            (longitude - self.origin.x) * self.x_scale,
            (latitude - self.origin.y) * self.y_scale,
        )
    }

    /// Projects a line of `[longitude, latitude]` pairs.
    #[must_use]
    pub fn project_line(&self, coordinates: &[[f64; 2]]) -> LineString<f64> {
        LineString::new(
            coordinates.iter().map(|c| self.project(c[0], c[1]).into()).collect::<Vec<Coord<f64>>>(),
        )
    }

    #[must_use]
    pub fn project_multiline(&self, lines: &MultiLineString<f64>) -> MultiLineString<f64> {
        MultiLineString::new(
            lines
                .0
                .iter()
                .map(|line| {
                    LineString::new(
                        line.0.iter().map(|c| self.project(c.x, c.y).into()).collect::<Vec<_>>(),
                    )
                })
                .collect(),
        )
    }
}

/// Where a point falls relative to a geometry: how far along it, and how far
/// off it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointOnLine {
    pub measure: f64,
    pub distance: f64,
}

#[must_use]
pub fn length(lines: &MultiLineString<f64>) -> f64 {
    lines.euclidean_length()
}

#[must_use]
pub fn point_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    (b.x() - a.x()).hypot(b.y() - a.y())
}

/// Finds the nearest point of `lines` to `point`.
///
/// The measure runs continuously across the parts of the multi-line, in the
/// order they appear. An empty geometry locates at measure 0 with infinite
/// distance.
#[must_use]
pub fn locate(lines: &MultiLineString<f64>, point: Point<f64>) -> PointOnLine {
    let mut best = PointOnLine { measure: 0.0, distance: f64::INFINITY };
    let mut traversed = 0.0;

    for line in &lines.0 {
        for segment in line.0.windows(2) {
            let (a, b) = (segment[0], segment[1]);
            let dx = b.x - a.x;
            let dy = b.y - a.y;
            let seg_len = dx.hypot(dy);

            let t = if seg_len > 0.0 {
                (((point.x() - a.x) * dx + (point.y() - a.y) * dy) / (seg_len * seg_len))
                    .clamp(0.0, 1.0)
            } else {
                0.0
            };
            let nearest_x = a.x + t * dx;
            let nearest_y = a.y + t * dy;
            let dist = (point.x() - nearest_x).hypot(point.y() - nearest_y);

            if dist < best.distance {
                best = PointOnLine { measure: traversed + t * seg_len, distance: dist };
            }
            traversed += seg_len;
        }
    }

    best
}

/// Cuts a multi-line in two at `distance` from its start, returning the head
/// and the tail.
///
/// A distance at or past either end returns the whole geometry on that side
/// and an empty multi-line on the other.
#[must_use]
pub fn cut(
    lines: &MultiLineString<f64>, distance: f64,
) -> (MultiLineString<f64>, MultiLineString<f64>) {
    if distance <= 0.0 {
        return (MultiLineString::new(Vec::new()), lines.clone());
    }
    if distance >= length(lines) {
        return (lines.clone(), MultiLineString::new(Vec::new()));
    }

    let mut traversed = 0.0;
    for (li, line) in lines.0.iter().enumerate() {
        let coords = &line.0;
        for ci in 1..coords.len() {
            let a = coords[ci - 1];
            let b = coords[ci];
            let seg_len = (b.x - a.x).hypot(b.y - a.y);
            if seg_len == 0.0 {
                continue;
            }
            traversed += seg_len;
            if traversed < distance {
                continue;
            }

            // cut point interpolated within this segment
            let t = (seg_len - (traversed - distance)) / seg_len;
            let cp = Coord { x: a.x + t * (b.x - a.x), y: a.y + t * (b.y - a.y) };

            let mut head = lines.0[..li].to_vec();
            let mut head_coords = coords[..ci].to_vec();
            head_coords.push(cp);
            head.push(LineString::new(head_coords));

            let mut tail_coords = vec![cp];
            tail_coords.extend_from_slice(&coords[ci..]);
            let mut tail = vec![LineString::new(tail_coords)];
            tail.extend_from_slice(&lines.0[li + 1..]);

            return (MultiLineString::new(head), MultiLineString::new(tail));
        }
    }

    // rounding left the cut past the last vertex
    (lines.clone(), MultiLineString::new(Vec::new()))
}

#[must_use]
pub fn simplify(lines: &MultiLineString<f64>, tolerance: f64) -> MultiLineString<f64> {
    lines.simplify(&tolerance)
}
