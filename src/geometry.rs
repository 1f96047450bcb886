//! GeoJSON validation and the geometric primitives used by AOI filtering.
//!
//! Input geometries arrive either as JSON objects or as JSON-encoded strings
//! (query-string parameters). [`validate`] parses them, checks structural
//! GeoJSON validity and rejects polygons whose rings cross. [`normalize`] does
//! the same minus the self-intersection check.
//!
//! Area, intersection and self-intersection detection sit behind the
//! [`GeometryOps`] trait; [`GeoOps`] is the default implementation on top of
//! the `geo` crate. Areas are spherical (Chamberlain-Duquette), in square
//! metres.

use crate::error::GeometryError;
use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{
    BooleanOps, ChamberlainDuquetteArea, Coord, Geometry, Line, LineString, MultiPolygon, Point,
    Polygon,
};
use geojson::GeoJson;
use serde_json::Value;

type Result<T> = std::result::Result<T, GeometryError>;

// ============================================================================
// Geometry capability
// ============================================================================

/// Geometric primitives needed by validation and coverage filtering.
pub trait GeometryOps: Send + Sync {
    /// Unsigned area of `geometry`. Non-areal geometries have zero area.
    fn area(&self, geometry: &Geometry<f64>) -> f64;

    /// Intersection of two areal geometries, `None` when they do not overlap.
    fn intersect(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> Option<Geometry<f64>>;

    /// Points where non-adjacent edges of `polygon` meet. Empty means simple.
    fn self_intersections(&self, polygon: &Polygon<f64>) -> Vec<Point<f64>>;
}

/// [`GeometryOps`] backed by the `geo` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoOps;

impl GeometryOps for GeoOps {
    fn area(&self, geometry: &Geometry<f64>) -> f64 {
        match geometry {
            Geometry::Polygon(p) => p.chamberlain_duquette_unsigned_area(),
            Geometry::MultiPolygon(mp) => mp.chamberlain_duquette_unsigned_area(),
            Geometry::Rect(r) => r.to_polygon().chamberlain_duquette_unsigned_area(),
            Geometry::Triangle(t) => t.to_polygon().chamberlain_duquette_unsigned_area(),
            Geometry::GeometryCollection(gc) => gc.0.iter().map(|g| self.area(g)).sum(),
            _ => 0.0,
        }
    }

    fn intersect(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> Option<Geometry<f64>> {
        let a = to_multi_polygon(a)?;
        let b = to_multi_polygon(b)?;
        let overlap = a.intersection(&b);
        if overlap.0.is_empty() {
            None
        } else {
            Some(Geometry::MultiPolygon(overlap))
        }
    }

    fn self_intersections(&self, polygon: &Polygon<f64>) -> Vec<Point<f64>> {
        let mut edges: Vec<Edge> = std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .enumerate()
            .flat_map(|(ring, ls)| ring_edges(ring, ls))
            .collect();

        // Sweep along x: only edges whose x-extents overlap can cross.
        edges.sort_by(|a, b| a.min_x.total_cmp(&b.min_x));

        let mut points = Vec::new();
        for (i, a) in edges.iter().enumerate() {
            for b in &edges[i + 1..] {
                if b.min_x > a.max_x {
                    break;
                }
                if a.is_adjacent(b) {
                    continue;
                }
                match line_intersection(a.line, b.line) {
                    Some(LineIntersection::SinglePoint { intersection, .. }) => {
                        points.push(Point::from(intersection));
                    }
                    Some(LineIntersection::Collinear { intersection }) => {
                        points.push(Point::from(intersection.start));
                    }
                    None => {}
                }
            }
        }
        points
    }
}

/// A ring edge tagged with its position so neighbours can be skipped.
struct Edge {
    ring: usize,
    index: usize,
    ring_len: usize,
    line: Line<f64>,
    min_x: f64,
    max_x: f64,
}

impl Edge {
    fn is_adjacent(&self, other: &Edge) -> bool {
        if self.ring != other.ring {
            return false;
        }
        let diff = self.index.abs_diff(other.index);
        diff == 1 || diff + 1 == self.ring_len
    }
}

fn ring_edges(ring: usize, ls: &LineString<f64>) -> Vec<Edge> {
    let mut coords: Vec<Coord<f64>> = ls.0.clone();
    coords.dedup();
    let ring_len = coords.len().saturating_sub(1);
    coords
        .windows(2)
        .enumerate()
        .map(|(index, w)| Edge {
            ring,
            index,
            ring_len,
            line: Line::new(w[0], w[1]),
            min_x: w[0].x.min(w[1].x),
            max_x: w[0].x.max(w[1].x),
        })
        .collect()
}

fn to_multi_polygon(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        Geometry::Rect(r) => Some(MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => Some(MultiPolygon::new(vec![t.to_polygon()])),
        _ => None,
    }
}

// ============================================================================
// Validation
// ============================================================================

/// A parsed GeoJSON value that passed validation.
#[derive(Debug, Clone)]
pub struct ValidGeometry {
    geojson: GeoJson,
}

impl ValidGeometry {
    /// True for `FeatureCollection` input.
    #[cfg(test)]
    pub fn is_collection(&self) -> bool {
        matches!(self.geojson, GeoJson::FeatureCollection(_))
    }

    /// The individual geometries: every feature's geometry for a collection,
    /// the single geometry otherwise.
    pub fn components(&self) -> Vec<&geojson::Geometry> {
        match &self.geojson {
            GeoJson::Geometry(g) => vec![g],
            GeoJson::Feature(f) => f.geometry.iter().collect(),
            GeoJson::FeatureCollection(fc) => {
                fc.features.iter().filter_map(|f| f.geometry.as_ref()).collect()
            }
        }
    }

    /// Components converted to `geo` geometries.
    pub fn geo_components(&self) -> Result<Vec<Geometry<f64>>> {
        self.components().into_iter().map(to_geo).collect()
    }
}

/// Parse and structurally validate without the self-intersection check.
pub fn normalize(input: &Value) -> Result<ValidGeometry> {
    let geojson = parse_geojson(input)?;
    let valid = ValidGeometry { geojson };
    if valid.components().is_empty() {
        return Err(GeometryError::InvalidGeoJson(
            "GeoJSON contains no geometry".into(),
        ));
    }
    Ok(valid)
}

/// Parse, structurally validate and reject self-intersecting polygons.
pub fn validate(input: &Value, ops: &dyn GeometryOps) -> Result<ValidGeometry> {
    let valid = normalize(input)?;

    for component in valid.components() {
        for polygon in polygons_of(&to_geo(component)?) {
            let kinks = ops.self_intersections(&polygon);
            if !kinks.is_empty() {
                return Err(GeometryError::SelfIntersectingPolygon { count: kinks.len() });
            }
        }
    }

    Ok(valid)
}

/// Accept an object or a JSON-encoded string.
fn parse_geojson(input: &Value) -> Result<GeoJson> {
    let value = match input {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .map_err(|e| GeometryError::InvalidGeoJson(format!("not valid JSON: {}", e)))?,
        other => other.clone(),
    };

    let geojson = GeoJson::from_json_value(value)
        .map_err(|e| GeometryError::InvalidGeoJson(e.to_string()))?;

    match &geojson {
        GeoJson::Geometry(g) => check_geometry(g)?,
        GeoJson::Feature(f) => {
            if let Some(g) = &f.geometry {
                check_geometry(g)?;
            }
        }
        GeoJson::FeatureCollection(fc) => {
            for g in fc.features.iter().filter_map(|f| f.geometry.as_ref()) {
                check_geometry(g)?;
            }
        }
    }

    Ok(geojson)
}

fn invalid(msg: &str) -> GeometryError {
    GeometryError::InvalidGeoJson(msg.to_string())
}

fn check_position(p: &[f64]) -> Result<()> {
    if p.len() < 2 {
        return Err(invalid("position must have at least two elements"));
    }
    if p.iter().any(|c| !c.is_finite()) {
        return Err(invalid("position elements must be finite numbers"));
    }
    Ok(())
}

fn check_line(line: &[Vec<f64>]) -> Result<()> {
    if line.len() < 2 {
        return Err(invalid("LineString must have at least two positions"));
    }
    line.iter().try_for_each(|p| check_position(p))
}

fn check_polygon(rings: &[Vec<Vec<f64>>]) -> Result<()> {
    for ring in rings {
        if ring.len() < 4 {
            return Err(invalid("linear ring must have at least four positions"));
        }
        ring.iter().try_for_each(|p| check_position(p))?;
        if ring.first() != ring.last() {
            return Err(invalid("linear ring must be closed"));
        }
    }
    Ok(())
}

fn check_geometry(geometry: &geojson::Geometry) -> Result<()> {
    use geojson::Value as G;

    match &geometry.value {
        G::Point(p) => check_position(p),
        G::MultiPoint(ps) => ps.iter().try_for_each(|p| check_position(p)),
        G::LineString(l) => check_line(l),
        G::MultiLineString(ls) => ls.iter().try_for_each(|l| check_line(l)),
        G::Polygon(rings) => check_polygon(rings),
        G::MultiPolygon(polys) => polys.iter().try_for_each(|p| check_polygon(p)),
        G::GeometryCollection(gs) => gs.iter().try_for_each(check_geometry),
    }
}

fn to_geo(geometry: &geojson::Geometry) -> Result<Geometry<f64>> {
    Geometry::<f64>::try_from(geometry.clone())
        .map_err(|e| GeometryError::InvalidGeoJson(e.to_string()))
}

fn polygons_of(geometry: &Geometry<f64>) -> Vec<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => vec![p.clone()],
        Geometry::MultiPolygon(mp) => mp.0.clone(),
        Geometry::GeometryCollection(gc) => gc.0.iter().flat_map(polygons_of).collect(),
        _ => Vec::new(),
    }
}

/// GeoJSON type name of a geometry, as it appears in the `type` member.
pub fn type_name(geometry: &geojson::Geometry) -> &'static str {
    use geojson::Value as G;

    match geometry.value {
        G::Point(_) => "Point",
        G::MultiPoint(_) => "MultiPoint",
        G::LineString(_) => "LineString",
        G::MultiLineString(_) => "MultiLineString",
        G::Polygon(_) => "Polygon",
        G::MultiPolygon(_) => "MultiPolygon",
        G::GeometryCollection(_) => "GeometryCollection",
    }
}
