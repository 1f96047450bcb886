//! Area-of-interest coverage filtering.
//!
//! Keeps only results whose footprint covers at least a given percentage of
//! the query geometry. For a feature collection the per-feature coverages are
//! summed against the area of the whole collection.

use crate::error::{Result, SearchError};
use crate::geometry::{self, GeometryOps};
use crate::query::FOOTPRINT_FIELD;
use geo::Geometry;
use serde_json::Value;
use tracing::debug;

/// Threshold and query geometry for coverage filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct AoiCoverage {
    /// Minimum coverage, in percent.
    pub threshold: f64,
    /// Raw `intersects` value (object or JSON string).
    pub geometry: Value,
}

/// Anything with a footprint geometry.
pub trait Footprint {
    fn footprint(&self) -> Option<&Value>;
}

impl Footprint for Value {
    fn footprint(&self) -> Option<&Value> {
        self.get(FOOTPRINT_FIELD).filter(|v| !v.is_null())
    }
}

/// Drop results covering less than `aoi.threshold` percent of the AOI.
///
/// Without a threshold the results pass through untouched. Order is preserved.
pub fn filter<R: Footprint>(
    results: Vec<R>,
    aoi: Option<&AoiCoverage>,
    ops: &dyn GeometryOps,
) -> Result<Vec<R>> {
    let Some(aoi) = aoi else {
        return Ok(results);
    };

    let components = geometry::normalize(&aoi.geometry)?.geo_components()?;
    let aoi_area: f64 = components.iter().map(|g| ops.area(g)).sum();
    if aoi_area <= 0.0 || !aoi_area.is_finite() {
        return Err(SearchError::Configuration(
            "AOI geometry has zero area; coverage percentage is undefined".into(),
        ));
    }

    let before = results.len();
    let kept: Vec<R> = results
        .into_iter()
        .filter(|r| coverage_percent(r, &components, aoi_area, ops) >= aoi.threshold)
        .collect();

    debug!(
        "AOI coverage >= {}%: kept {} of {} results",
        aoi.threshold,
        kept.len(),
        before
    );
    Ok(kept)
}

/// Percentage of the AOI covered by the result's footprint. A missing or
/// unreadable footprint covers nothing.
fn coverage_percent<R: Footprint>(
    result: &R,
    components: &[Geometry<f64>],
    aoi_area: f64,
    ops: &dyn GeometryOps,
) -> f64 {
    let Some(footprint) = result
        .footprint()
        .and_then(|f| geometry::normalize(f).ok())
        .and_then(|g| g.geo_components().ok())
    else {
        return 0.0;
    };

    components
        .iter()
        .map(|component| {
            let overlap: f64 = footprint
                .iter()
                .filter_map(|f| ops.intersect(component, f))
                .map(|g| ops.area(&g))
                .sum();
            overlap / aoi_area * 100.0
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoOps;
    use serde_json::json;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]]
        })
    }

    fn scene(id: &str, footprint: Value) -> Value {
        json!({"scene_id": id, "data_geometry": footprint})
    }

    fn ids(results: &[Value]) -> Vec<&str> {
        results.iter().map(|r| r["scene_id"].as_str().unwrap()).collect()
    }

    fn scenes() -> Vec<Value> {
        vec![
            scene("full", square(-1.0, -1.0, 3.0, 3.0)),
            scene("none", square(10.0, 10.0, 11.0, 11.0)),
            scene("quarter", square(1.0, 1.0, 3.0, 3.0)),
            scene("half", square(1.0, -1.0, 3.0, 3.0)),
            json!({"scene_id": "no-footprint"}),
        ]
    }

    #[test]
    fn test_absent_coverage_is_identity() {
        let results = scenes();
        let filtered = filter(results.clone(), None, &GeoOps).unwrap();
        assert_eq!(filtered, results);
    }

    #[test]
    fn test_threshold_keeps_order() {
        let aoi = AoiCoverage {
            threshold: 40.0,
            geometry: square(0.0, 0.0, 2.0, 2.0),
        };
        let filtered = filter(scenes(), Some(&aoi), &GeoOps).unwrap();
        assert_eq!(ids(&filtered), vec!["full", "half"]);
    }

    #[test]
    fn test_string_geometry_is_accepted() {
        let aoi = AoiCoverage {
            threshold: 99.0,
            geometry: Value::String(square(0.0, 0.0, 2.0, 2.0).to_string()),
        };
        let filtered = filter(scenes(), Some(&aoi), &GeoOps).unwrap();
        assert_eq!(ids(&filtered), vec!["full"]);
    }

    #[test]
    fn test_feature_collection_sums_components() {
        let fc = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {}, "geometry": square(0.0, 0.0, 1.0, 1.0)},
                {"type": "Feature", "properties": {}, "geometry": square(2.0, 0.0, 3.0, 1.0)}
            ]
        });
        let aoi = AoiCoverage { threshold: 90.0, geometry: fc };
        let results = vec![
            scene("both", square(-1.0, -1.0, 4.0, 2.0)),
            scene("left", square(-1.0, -1.0, 1.5, 2.0)),
        ];
        let filtered = filter(results, Some(&aoi), &GeoOps).unwrap();
        assert_eq!(ids(&filtered), vec!["both"]);
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let aoi = AoiCoverage {
            threshold: 20.0,
            geometry: square(0.0, 0.0, 2.0, 2.0),
        };
        let once = filter(scenes(), Some(&aoi), &GeoOps).unwrap();
        let twice = filter(once.clone(), Some(&aoi), &GeoOps).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_zero_area_aoi_is_configuration_error() {
        let aoi = AoiCoverage {
            threshold: 10.0,
            geometry: json!({"type": "Point", "coordinates": [1.0, 1.0]}),
        };
        let err = filter(scenes(), Some(&aoi), &GeoOps).unwrap_err();
        assert!(matches!(err, SearchError::Configuration(_)));
    }

    #[test]
    fn test_invalid_geometry_is_reported() {
        let aoi = AoiCoverage {
            threshold: 10.0,
            geometry: json!("{broken"),
        };
        let err = filter(scenes(), Some(&aoi), &GeoOps).unwrap_err();
        assert!(matches!(err, SearchError::InvalidGeoJson(_)));
    }
}
