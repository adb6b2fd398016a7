//! Control-point curves and the spline fitted through them.
//!
//! A [`Curve`] is what the host hands over: ordered control points in world
//! millimetres plus an open/closed flag. [`Spline`] is the interpolating
//! cubic built from it, with an arc-length table so positions can be looked
//! up by distance travelled along the curve.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::enums::SplineKind;
use crate::error::PanoramaError;

/// Control points closer than this are treated as the same point.
pub const DISTINCT_POINT_TOLERANCE: f64 = 1e-6;

/// Arc-length table resolution per spline segment.
const SUBDIVISIONS: usize = 32;

/// Gauss-Legendre nodes and weights on [-1, 1].
const GAUSS_NODES: [f64; 5] = [
    0.0,
    -0.538_469_310_105_683_1,
    0.538_469_310_105_683_1,
    -0.906_179_845_938_664,
    0.906_179_845_938_664,
];
const GAUSS_WEIGHTS: [f64; 5] = [
    0.568_888_888_888_888_9,
    0.478_628_670_499_366_5,
    0.478_628_670_499_366_5,
    0.236_926_885_056_189_1,
    0.236_926_885_056_189_1,
];

const NEWTON_TOLERANCE: f64 = 1e-10;
const NEWTON_MAX_ITERATIONS: usize = 32;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    points: Vec<DVec3>,
    closed: bool,
    #[serde(default)]
    spline: SplineKind,
    #[serde(skip)]
    revision: u64,
}

impl Curve {
    pub fn new(points: Vec<DVec3>, closed: bool) -> Self {
        Self {
            points,
            closed,
            spline: SplineKind::default(),
            revision: 0,
        }
    }

    pub fn open(points: Vec<DVec3>) -> Self {
        Self::new(points, false)
    }

    pub fn closed(points: Vec<DVec3>) -> Self {
        Self::new(points, true)
    }

    pub fn with_spline(mut self, spline: SplineKind) -> Self {
        self.spline = spline;
        self
    }

    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn spline(&self) -> SplineKind {
        self.spline
    }

    /// Bumped by every mutation; compare against a stored value to find out
    /// whether the curve changed since it was last sampled.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn push_point(&mut self, point: DVec3) {
        self.points.push(point);
        self.touch();
    }

    /// Moves control point `index`; returns `false` if there is no such point.
    pub fn set_point(&mut self, index: usize, point: DVec3) -> bool {
        match self.points.get_mut(index) {
            Some(existing) => {
                *existing = point;
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn set_points(&mut self, points: Vec<DVec3>) {
        self.points = points;
        self.touch();
    }

    pub fn set_closed(&mut self, closed: bool) {
        self.closed = closed;
        self.touch();
    }

    pub fn set_spline(&mut self, spline: SplineKind) {
        self.spline = spline;
        self.touch();
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Control points with consecutive duplicates removed; for closed curves
    /// a final point repeating the first one is dropped as well.
    pub fn distinct_points(&self) -> Vec<DVec3> {
        let mut distinct: Vec<DVec3> = Vec::with_capacity(self.points.len());
        for point in &self.points {
            let is_repeat = distinct
                .last()
                .is_some_and(|last| last.distance(*point) <= DISTINCT_POINT_TOLERANCE);
            if !is_repeat {
                distinct.push(*point);
            }
        }
        if self.closed && distinct.len() > 1 {
            let first = distinct[0];
            if distinct
                .last()
                .is_some_and(|last| last.distance(first) <= DISTINCT_POINT_TOLERANCE)
            {
                distinct.pop();
            }
        }
        distinct
    }

    /// Arc length of the fitted spline.
    ///
    /// # Errors
    ///
    /// `DegenerateCurve` when the curve has too few distinct points.
    pub fn length(&self) -> Result<f64, PanoramaError> {
        Ok(Spline::new(self)?.length())
    }

    /// Whether a host should discard this curve: too few points or no length.
    pub fn is_degenerate(&self) -> bool {
        self.length().map_or(true, |length| length <= 0.0)
    }
}

/// Cubic Hermite segment from `p0` to `p1`.
#[derive(Clone, Copy, Debug)]
struct HermiteSegment {
    p0: DVec3,
    p1: DVec3,
    m0: DVec3,
    m1: DVec3,
}

impl HermiteSegment {
    #[inline]
    fn position(&self, t: f64) -> DVec3 {
        let t2 = t * t;
        let t3 = t2 * t;
        let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
        let h10 = t3 - 2.0 * t2 + t;
        let h01 = -2.0 * t3 + 3.0 * t2;
        let h11 = t3 - t2;
        self.p0 * h00 + self.m0 * h10 + self.p1 * h01 + self.m1 * h11
    }

    #[inline]
    fn derivative(&self, t: f64) -> DVec3 {
        let t2 = t * t;
        let d00 = 6.0 * t2 - 6.0 * t;
        let d10 = 3.0 * t2 - 4.0 * t + 1.0;
        let d01 = -6.0 * t2 + 6.0 * t;
        let d11 = 3.0 * t2 - 2.0 * t;
        self.p0 * d00 + self.m0 * d10 + self.p1 * d01 + self.m1 * d11
    }

    /// Length between parameters `a` and `b` by 5-point Gauss-Legendre.
    fn arc_length(&self, a: f64, b: f64) -> f64 {
        let half = 0.5 * (b - a);
        let mid = 0.5 * (a + b);
        GAUSS_NODES
            .iter()
            .zip(GAUSS_WEIGHTS.iter())
            .map(|(node, weight)| weight * self.derivative(mid + half * node).length())
            .sum::<f64>()
            * half
    }
}

/// Location on a spline: segment index and local parameter in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SplineParameter {
    pub segment: usize,
    pub t: f64,
}

/// Interpolating spline through a curve's distinct control points.
#[derive(Clone, Debug)]
pub(crate) struct Spline {
    segments: Vec<HermiteSegment>,
    /// Arc length at the start of every sub-interval, plus the total at the end.
    cumulative: Vec<f64>,
    closed: bool,
}

impl Spline {
    pub(crate) fn new(curve: &Curve) -> Result<Self, PanoramaError> {
        let points = curve.distinct_points();
        let required = if curve.is_closed() { 3 } else { 2 };
        if points.len() < required {
            return Err(PanoramaError::DegenerateCurve(format!(
                "{} distinct control point(s), {} required for a{} curve",
                points.len(),
                required,
                if curve.is_closed() { " closed" } else { "n open" }
            )));
        }

        let segments = Self::build_segments(&points, curve.is_closed(), curve.spline());
        let mut cumulative = Vec::with_capacity(segments.len() * SUBDIVISIONS + 1);
        let mut total = 0.0;
        for segment in &segments {
            for k in 0..SUBDIVISIONS {
                cumulative.push(total);
                let a = k as f64 / SUBDIVISIONS as f64;
                let b = (k + 1) as f64 / SUBDIVISIONS as f64;
                total += segment.arc_length(a, b);
            }
        }
        cumulative.push(total);

        if !total.is_finite() || total <= 0.0 {
            return Err(PanoramaError::DegenerateCurve(
                "curve has zero arc length".to_string(),
            ));
        }

        Ok(Self {
            segments,
            cumulative,
            closed: curve.is_closed(),
        })
    }

    fn build_segments(points: &[DVec3], closed: bool, kind: SplineKind) -> Vec<HermiteSegment> {
        let n = points.len();
        let segment_count = if closed { n } else { n - 1 };

        let tangents: Vec<DVec3> = match kind {
            // Chord tangents at both ends make every segment a uniform-speed line.
            SplineKind::Linear => Vec::new(),
            SplineKind::Kochanek { tension, bias } => (0..n)
                .map(|i| {
                    let current = points[i];
                    let previous = match (i, closed) {
                        (0, true) => points[n - 1],
                        (0, false) => 2.0 * points[0] - points[1],
                        _ => points[i - 1],
                    };
                    let next = match (i + 1 == n, closed) {
                        (true, true) => points[0],
                        (true, false) => 2.0 * points[n - 1] - points[n - 2],
                        _ => points[i + 1],
                    };
                    let incoming = current - previous;
                    let outgoing = next - current;
                    incoming * ((1.0 - tension) * (1.0 + bias) * 0.5)
                        + outgoing * ((1.0 - tension) * (1.0 - bias) * 0.5)
                })
                .collect(),
        };

        (0..segment_count)
            .map(|i| {
                let j = (i + 1) % n;
                let (p0, p1) = (points[i], points[j]);
                let (m0, m1) = match kind {
                    SplineKind::Linear => (p1 - p0, p1 - p0),
                    SplineKind::Kochanek { .. } => (tangents[i], tangents[j]),
                };
                HermiteSegment { p0, p1, m0, m1 }
            })
            .collect()
    }

    pub(crate) fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn position(&self, at: SplineParameter) -> DVec3 {
        self.segments[at.segment].position(at.t)
    }

    pub(crate) fn derivative(&self, at: SplineParameter) -> DVec3 {
        self.segments[at.segment].derivative(at.t)
    }

    /// Unit tangent; where the derivative vanishes the direction of a short
    /// chord is used instead.
    pub(crate) fn tangent(&self, at: SplineParameter) -> Option<DVec3> {
        self.derivative(at).try_normalize().or_else(|| {
            const STEP: f64 = 1e-4;
            let segment = &self.segments[at.segment];
            let (a, b) = if at.t < 0.5 {
                (at.t, at.t + STEP)
            } else {
                (at.t - STEP, at.t)
            };
            (segment.position(b) - segment.position(a)).try_normalize()
        })
    }

    /// Arc length from the start of the curve to `at`.
    pub(crate) fn distance_at(&self, at: SplineParameter) -> f64 {
        let sub = ((at.t * SUBDIVISIONS as f64).floor() as usize).min(SUBDIVISIONS - 1);
        let t_start = sub as f64 / SUBDIVISIONS as f64;
        self.cumulative[at.segment * SUBDIVISIONS + sub]
            + self.segments[at.segment].arc_length(t_start, at.t)
    }

    /// Spline parameter at arc length `distance`, clamped to the curve.
    pub(crate) fn parameter_at(&self, distance: f64) -> SplineParameter {
        let total = self.length();
        let distance = distance.clamp(0.0, total);

        let last_interval = self.cumulative.len() - 2;
        let interval = self
            .cumulative
            .partition_point(|&s| s <= distance)
            .saturating_sub(1)
            .min(last_interval);

        let segment = interval / SUBDIVISIONS;
        let sub = interval % SUBDIVISIONS;
        let t_start = sub as f64 / SUBDIVISIONS as f64;
        let t_end = (sub + 1) as f64 / SUBDIVISIONS as f64;
        let s_start = self.cumulative[interval];
        let s_end = self.cumulative[interval + 1];

        if distance >= s_end {
            return SplineParameter { segment, t: t_end };
        }

        let hermite = &self.segments[segment];
        let (mut lo, mut hi) = (t_start, t_end);
        let mut t = if s_end > s_start {
            t_start + (t_end - t_start) * (distance - s_start) / (s_end - s_start)
        } else {
            t_start
        };
        // Safeguarded Newton on s(t) - distance, bisecting when a step leaves the bracket.
        for _ in 0..NEWTON_MAX_ITERATIONS {
            let residual = s_start + hermite.arc_length(t_start, t) - distance;
            if residual.abs() < NEWTON_TOLERANCE {
                break;
            }
            if residual > 0.0 {
                hi = t;
            } else {
                lo = t;
            }
            let speed = hermite.derivative(t).length();
            let next = t - residual / speed;
            t = if speed > f64::EPSILON && next > lo && next < hi {
                next
            } else {
                0.5 * (lo + hi)
            };
        }

        SplineParameter { segment, t }
    }
}
