//! Search orchestration: pagination, one store round-trip, and the three
//! response shapes (flat list, GeoJSON, aggregation counts).
//!
//! A [`Search`] is built from one parameter map and consumed by exactly one
//! of [`Search::simple`], [`Search::geojson`] or [`Search::count`].

use crate::aggregation::compile_aggregation;
use crate::aoi::{self, AoiCoverage};
use crate::error::{Result, SearchError};
use crate::geometry::GeometryOps;
use crate::query::{compile, value_text, ParameterMap, FOOTPRINT_FIELD};
use crate::store::{DocumentStore, SearchBody, StoreRequest, StoreResponse};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

pub const LICENSE: &str = "CC0-1.0";

/// Fields copied into each GeoJSON feature's properties.
const GEOJSON_PROPERTIES: &[&str] = &["scene_id", "satellite_name", "cloud_coverage", "date", "thumbnail"];

/// Site identity reported in response metadata.
#[derive(Debug, Clone)]
pub struct SiteInfo {
    pub name: String,
    pub website: String,
}

/// Long-lived collaborators shared by all requests.
#[derive(Clone)]
pub struct SearchContext {
    pub store: Arc<dyn DocumentStore>,
    pub geometry: Arc<dyn GeometryOps>,
    pub index: String,
    pub site: SiteInfo,
}

// ============================================================================
// Pagination
// ============================================================================

/// Deepest `from + size` the store will page to (`index.max_result_window`).
pub const MAX_RESULT_WINDOW: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Page reported back to the caller (`skip` when given).
    pub page: u64,
    pub size: u64,
    pub offset: u64,
}

impl Pagination {
    pub fn from_params(params: &ParameterMap) -> Result<Self> {
        let page = parse_count(params, "page")?.unwrap_or(1);
        let size = parse_count(params, "limit")?.unwrap_or(1);
        let skip = parse_count(params, "skip")?;

        if page < 1 {
            return Err(invalid_parameter("page", &page.to_string()));
        }
        if !(1..=MAX_RESULT_WINDOW).contains(&size) {
            return Err(invalid_parameter("limit", &size.to_string()));
        }

        let offset = (page - 1)
            .checked_mul(size)
            .filter(|offset| *offset <= MAX_RESULT_WINDOW - size)
            .ok_or_else(|| invalid_parameter("page", &page.to_string()))?;

        Ok(Pagination {
            page: skip.unwrap_or(page),
            size,
            offset,
        })
    }
}

fn invalid_parameter(name: &str, value: &str) -> SearchError {
    SearchError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn parse_count(params: &ParameterMap, name: &str) -> Result<Option<u64>> {
    let Some(value) = params.get(name) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .map(Some)
        .ok_or_else(|| invalid_parameter(name, &value.to_string()))
}

/// AOI coverage applies only when both the threshold and `intersects` are given.
fn parse_aoi(params: &ParameterMap) -> Result<Option<AoiCoverage>> {
    let (Some(threshold), Some(geometry)) =
        (params.get("aoi_coverage_percentage"), params.get("intersects"))
    else {
        return Ok(None);
    };

    let percent = match threshold {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|p| p.is_finite())
    .ok_or_else(|| invalid_parameter("aoi_coverage_percentage", &threshold.to_string()))?;

    Ok(Some(AoiCoverage {
        threshold: percent,
        geometry: geometry.clone(),
    }))
}

/// `found` as the flat-list endpoint has always reported it: the store's
/// total, replaced by the returned count only when fewer results than the
/// page size came back. This also fires on a short last page.
pub fn legacy_found_count(total: u64, returned: usize, size: u64) -> u64 {
    if (returned as u64) < size {
        returned as u64
    } else {
        total
    }
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Meta {
    pub found: u64,
    pub name: String,
    pub license: &'static str,
    pub website: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimpleResponse {
    pub meta: Meta,
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionProperties {
    pub found: u64,
    pub limit: u64,
    pub page: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneFeature {
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub properties: serde_json::Map<String, Value>,
    pub geometry: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeoJsonResponse {
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub properties: CollectionProperties,
    pub features: Vec<SceneFeature>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountResponse {
    pub meta: Meta,
    pub counts: Value,
}

// ============================================================================
// Search
// ============================================================================

/// A single-use search over one parameter map.
#[derive(Debug)]
pub struct Search {
    params: ParameterMap,
    pagination: Pagination,
    aoi: Option<AoiCoverage>,
}

impl Search {
    pub fn new(params: ParameterMap) -> Result<Self> {
        debug!("Search parameters: {:?}", params);
        let pagination = Pagination::from_params(&params)?;
        let aoi = parse_aoi(&params)?;
        Ok(Search {
            params,
            pagination,
            aoi,
        })
    }

    #[cfg(test)]
    pub fn aoi(&self) -> Option<&AoiCoverage> {
        self.aoi.as_ref()
    }

    /// Request for the flat-list and GeoJSON shapes.
    pub fn build_search(&self, index: &str) -> Result<StoreRequest> {
        let plan = compile(&self.params)?;
        debug!("Compiled query plan: {:?}", plan);

        let source_fields = self.params.get("fields").and_then(value_text).map(|f| {
            f.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Ok(StoreRequest {
            index: index.to_string(),
            body: SearchBody::Query(plan),
            size: self.pagination.size,
            from: self.pagination.offset,
            source_fields,
        })
    }

    /// Request for the count shape: buckets only, no hits.
    pub fn build_aggregation(&self, index: &str) -> Result<StoreRequest> {
        let query = compile(&self.params)?;
        let aggregations = compile_aggregation(&self.params);
        debug!("Compiled aggregation plan: {:?} over {:?}", aggregations, query);

        Ok(StoreRequest {
            index: index.to_string(),
            body: SearchBody::Aggregation {
                query,
                aggregations,
            },
            size: 0,
            from: 0,
            source_fields: None,
        })
    }

    /// Flat list of source documents, AOI-filtered when requested.
    pub async fn simple(self, ctx: &SearchContext) -> Result<SimpleResponse> {
        let request = self.build_search(&ctx.index)?;
        let response = execute(ctx, &request).await?;

        let documents: Vec<Value> = response.hits.hits.into_iter().map(|h| h.source).collect();
        let mut results = aoi::filter(documents, self.aoi.as_ref(), ctx.geometry.as_ref())?;
        results.iter_mut().for_each(with_cloud_cover_full);

        let found = legacy_found_count(response.hits.total, results.len(), self.pagination.size);

        Ok(SimpleResponse {
            meta: Meta {
                found,
                name: ctx.site.name.clone(),
                license: LICENSE,
                website: ctx.site.website.clone(),
                page: Some(self.pagination.page),
                limit: Some(self.pagination.size),
            },
            results,
        })
    }

    /// Feature collection with a narrow property set per scene.
    pub async fn geojson(self, ctx: &SearchContext) -> Result<GeoJsonResponse> {
        let request = self.build_search(&ctx.index)?;
        let response = execute(ctx, &request).await?;

        let features = response
            .hits
            .hits
            .into_iter()
            .map(|hit| scene_feature(hit.source))
            .collect();

        Ok(GeoJsonResponse {
            type_: "FeatureCollection",
            properties: CollectionProperties {
                found: response.hits.total,
                limit: self.pagination.size,
                page: self.pagination.page,
            },
            features,
        })
    }

    /// Aggregation buckets as returned by the store.
    pub async fn count(self, ctx: &SearchContext) -> Result<CountResponse> {
        let request = self.build_aggregation(&ctx.index)?;
        let response = execute(ctx, &request).await?;

        Ok(CountResponse {
            meta: Meta {
                found: response.hits.total,
                name: ctx.site.name.clone(),
                license: LICENSE,
                website: ctx.site.website.clone(),
                page: None,
                limit: None,
            },
            counts: response
                .aggregations
                .unwrap_or_else(|| Value::Object(Default::default())),
        })
    }
}

async fn execute(ctx: &SearchContext, request: &StoreRequest) -> Result<StoreResponse> {
    ctx.store.search(request).await.map_err(|e| {
        error!("Search against index {} failed: {}", request.index, e);
        SearchError::from(e)
    })
}

/// Mirror `cloud_coverage` into `cloudCoverFull` unless already present.
fn with_cloud_cover_full(doc: &mut Value) {
    if let Some(obj) = doc.as_object_mut() {
        if !obj.contains_key("cloudCoverFull") {
            let cloud = obj.get("cloud_coverage").cloned().unwrap_or(Value::Null);
            obj.insert("cloudCoverFull".to_string(), cloud);
        }
    }
}

fn scene_feature(mut source: Value) -> SceneFeature {
    let properties = GEOJSON_PROPERTIES
        .iter()
        .map(|key| {
            let value = source.get(*key).cloned().unwrap_or(Value::Null);
            (key.to_string(), value)
        })
        .collect();
    let geometry = source
        .get_mut(FOOTPRINT_FIELD)
        .map(Value::take)
        .unwrap_or(Value::Null);

    SceneFeature {
        type_: "Feature",
        properties,
        geometry,
    }
}
