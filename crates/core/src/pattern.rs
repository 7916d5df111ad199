//! Boustrophedon ("lawn-mower") survey generation over a polygon.
//!
//! The bounding box of the survey polygon is sampled on a regular grid. Rows
//! alternate direction so consecutive legs stay adjacent, and every sample
//! is filtered through a [`PolygonContainment`] strategy so the vehicle never
//! photographs outside the requested area.

use thiserror::Error;

use crate::model::{Coordinate, SurveyAction, SurveyPoint};

/// Grid spacing in degrees, roughly 10 m on the ground.
pub const DEFAULT_GRID_SPACING_DEG: f64 = 0.0001;

/// Extra altitude for the orthogonal cross-hatch pass, in meters.
pub const CROSS_HATCH_ALTITUDE_OFFSET_M: f64 = 10.0;

/// Upper bound on grid samples per survey, both passes included. A 1 km
/// square at the default spacing samples about 8 300 cells per pass.
pub const MAX_SURVEY_POINTS: usize = 25_000;

/// Points this close to an edge count as inside (about 0.1 mm).
const BOUNDARY_TOLERANCE_DEG: f64 = 1e-9;

/// Rings whose shoelace area (deg²) falls below this are treated as collinear.
const MIN_RING_AREA_DEG2: f64 = 1e-14;

/// Survey input that cannot be turned into a flight pattern.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatternError {
    /// Fewer than three polygon vertices.
    #[error("survey area needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    /// Collinear or repeated vertices.
    #[error("survey area is degenerate (zero area)")]
    Degenerate,
    /// The polygon is smaller than one grid cell and misses every sample.
    #[error("no grid cell falls inside the survey area")]
    Empty,
    /// Planner built with a spacing that is not a positive number.
    #[error("grid spacing must be a positive number of degrees, got {0}")]
    InvalidSpacing(f64),
    /// The grid would exceed [`MAX_SURVEY_POINTS`].
    #[error("survey area is too large: {cells} grid samples exceed the limit of {max}")]
    TooLarge {
        /// Samples the request would need, both passes counted.
        cells: usize,
        /// The limit in force.
        max: usize,
    },
}

/// Axis-aligned lat/lng box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lng: f64,
    /// Eastern edge.
    pub max_lng: f64,
}

impl BoundingBox {
    /// Smallest box holding every coordinate, `None` for an empty slice.
    pub fn of(points: &[Coordinate]) -> Option<Self> {
        let first = points.first()?;
        let init = Self {
            min_lat: first.lat(),
            max_lat: first.lat(),
            min_lng: first.lng(),
            max_lng: first.lng(),
        };
        Some(points.iter().fold(init, |b, c| Self {
            min_lat: b.min_lat.min(c.lat()),
            max_lat: b.max_lat.max(c.lat()),
            min_lng: b.min_lng.min(c.lng()),
            max_lng: b.max_lng.max(c.lng()),
        }))
    }

    /// Inclusive containment test.
    pub fn contains(&self, c: &Coordinate) -> bool {
        (self.min_lat..=self.max_lat).contains(&c.lat())
            && (self.min_lng..=self.max_lng).contains(&c.lng())
    }

    /// Number of grid samples a single sweep of this box visits.
    pub fn grid_cells(&self, spacing_deg: f64) -> usize {
        axis_len(self.min_lat, self.max_lat, spacing_deg)
            .saturating_mul(axis_len(self.min_lng, self.max_lng, spacing_deg))
    }
}

/// Decides whether a sampled grid cell belongs to the survey area.
pub trait PolygonContainment {
    /// Box that bounds every contained point.
    fn bounds(&self) -> BoundingBox;

    /// True when `point` lies inside the area or on its boundary.
    fn contains(&self, point: &Coordinate) -> bool;
}

/// Closed polygon ring; the edge from the last vertex back to the first is implied.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    ring: Vec<Coordinate>,
    bounds: BoundingBox,
}

impl Polygon {
    /// Builds a ring from operator-supplied vertices.
    pub fn new(vertices: &[Coordinate]) -> Result<Self, PatternError> {
        if vertices.len() < 3 {
            return Err(PatternError::TooFewVertices(vertices.len()));
        }
        let bounds = BoundingBox::of(vertices).ok_or(PatternError::TooFewVertices(0))?;
        if shoelace_deg2(vertices) < MIN_RING_AREA_DEG2 {
            return Err(PatternError::Degenerate);
        }
        Ok(Self {
            ring: vertices.to_vec(),
            bounds,
        })
    }

    /// The ring as given, without a closing repeat of the first vertex.
    pub fn vertices(&self) -> &[Coordinate] {
        &self.ring
    }
}

impl PolygonContainment for Polygon {
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    fn contains(&self, point: &Coordinate) -> bool {
        if !self.bounds.contains(point) {
            return false;
        }
        let (px, py) = (point.lng(), point.lat());
        let n = self.ring.len();
        let mut inside = false;
        for i in 0..n {
            let a = self.ring[i];
            let b = self.ring[(i + 1) % n];
            if on_segment(px, py, &a, &b) {
                return true;
            }
            let (xi, yi) = (a.lng(), a.lat());
            let (xj, yj) = (b.lng(), b.lat());
            if (yi > py) != (yj > py) {
                let x_cross = xi + (py - yi) * (xj - xi) / (yj - yi);
                if px < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

fn on_segment(px: f64, py: f64, a: &Coordinate, b: &Coordinate) -> bool {
    let (ax, ay, bx, by) = (a.lng(), a.lat(), b.lng(), b.lat());
    let len = (bx - ax).hypot(by - ay);
    if len == 0.0 {
        return (px - ax).hypot(py - ay) <= BOUNDARY_TOLERANCE_DEG;
    }
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    if cross.abs() / len > BOUNDARY_TOLERANCE_DEG {
        return false;
    }
    px >= ax.min(bx) - BOUNDARY_TOLERANCE_DEG
        && px <= ax.max(bx) + BOUNDARY_TOLERANCE_DEG
        && py >= ay.min(by) - BOUNDARY_TOLERANCE_DEG
        && py <= ay.max(by) + BOUNDARY_TOLERANCE_DEG
}

fn shoelace_deg2(ring: &[Coordinate]) -> f64 {
    let n = ring.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a.lng() * b.lat() - b.lng() * a.lat()
        })
        .sum();
    twice.abs() / 2.0
}

/// Number of samples [`grid_axis`] produces, without allocating them.
fn axis_len(min: f64, max: f64, spacing: f64) -> usize {
    // Float-to-int `as` saturates, so absurd extents stay finite.
    (((max - min) / spacing + 1e-9).floor() as usize).saturating_add(1)
}

/// Sample positions along one axis: `min, min + s, ...`, never past `max`.
fn grid_axis(min: f64, max: f64, spacing: f64) -> Vec<f64> {
    (0..axis_len(min, max, spacing))
        .map(|i| (min + i as f64 * spacing).min(max))
        .collect()
}

/// Generates photo waypoints for a survey polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurveyPlanner {
    grid_spacing_deg: f64,
}

impl Default for SurveyPlanner {
    fn default() -> Self {
        Self {
            grid_spacing_deg: DEFAULT_GRID_SPACING_DEG,
        }
    }
}

impl SurveyPlanner {
    /// Planner sampling every `grid_spacing_deg` degrees on both axes.
    pub fn new(grid_spacing_deg: f64) -> Result<Self, PatternError> {
        if !grid_spacing_deg.is_finite() || grid_spacing_deg <= 0.0 {
            return Err(PatternError::InvalidSpacing(grid_spacing_deg));
        }
        Ok(Self { grid_spacing_deg })
    }

    /// Sample spacing in degrees.
    pub fn grid_spacing_deg(&self) -> f64 {
        self.grid_spacing_deg
    }

    /// Builds the survey for `vertices` at `altitude_m`.
    ///
    /// With `enhanced_3d` a second, column-wise pass at
    /// `altitude_m + CROSS_HATCH_ALTITUDE_OFFSET_M` is appended after the
    /// row-wise pass. Grids over [`MAX_SURVEY_POINTS`] samples are refused
    /// before any point is generated.
    pub fn generate(
        &self,
        vertices: &[Coordinate],
        altitude_m: f64,
        enhanced_3d: bool,
    ) -> Result<Vec<SurveyPoint>, PatternError> {
        let polygon = Polygon::new(vertices)?;
        let passes = if enhanced_3d { 2 } else { 1 };
        let cells = polygon
            .bounds()
            .grid_cells(self.grid_spacing_deg)
            .saturating_mul(passes);
        if cells > MAX_SURVEY_POINTS {
            return Err(PatternError::TooLarge {
                cells,
                max: MAX_SURVEY_POINTS,
            });
        }
        let points = self.sweep(&polygon, altitude_m, enhanced_3d);
        if points.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(points)
    }

    /// Sweeps any containment region. Cells the region rejects are skipped.
    pub fn sweep<R>(&self, region: &R, altitude_m: f64, enhanced_3d: bool) -> Vec<SurveyPoint>
    where
        R: PolygonContainment + ?Sized,
    {
        let b = region.bounds();
        let lats = grid_axis(b.min_lat, b.max_lat, self.grid_spacing_deg);
        let lngs = grid_axis(b.min_lng, b.max_lng, self.grid_spacing_deg);
        let mut out = Vec::new();

        for (row, &lat) in lats.iter().enumerate() {
            if row % 2 == 0 {
                for &lng in &lngs {
                    push_if_inside(region, &mut out, lat, lng, altitude_m);
                }
            } else {
                for &lng in lngs.iter().rev() {
                    push_if_inside(region, &mut out, lat, lng, altitude_m);
                }
            }
        }

        if enhanced_3d {
            let cross_alt = altitude_m + CROSS_HATCH_ALTITUDE_OFFSET_M;
            for (col, &lng) in lngs.iter().enumerate() {
                if col % 2 == 0 {
                    for &lat in &lats {
                        push_if_inside(region, &mut out, lat, lng, cross_alt);
                    }
                } else {
                    for &lat in lats.iter().rev() {
                        push_if_inside(region, &mut out, lat, lng, cross_alt);
                    }
                }
            }
        }

        out
    }
}

fn push_if_inside<R>(region: &R, out: &mut Vec<SurveyPoint>, lat: f64, lng: f64, altitude: f64)
where
    R: PolygonContainment + ?Sized,
{
    let Ok(coordinate) = Coordinate::new(lat, lng) else {
        return;
    };
    if region.contains(&coordinate) {
        out.push(SurveyPoint {
            coordinate,
            altitude,
            action: SurveyAction::Photo,
        });
    }
}
