//! Elasticsearch-backed document store.
//!
//! Renders query and aggregation plans into the Elasticsearch query DSL and
//! posts them to `{host}/{index}/_search`.

use crate::aggregation::{AggregationKind, AggregationPlan, DATE_BUCKET_FORMAT};
use crate::error::StoreError;
use crate::query::{Clause, QueryPlan, Shape};
use crate::store::{DocumentStore, SearchBody, StoreRequest, StoreResponse};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

pub struct ElasticsearchStore {
    client: Client,
    base_url: String,
}

impl ElasticsearchStore {
    /// `host` may omit the scheme (`localhost:9200`); `http://` is assumed.
    pub fn new(host: &str, request_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: normalize_host(host),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl fmt::Debug for ElasticsearchStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchStore")
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn search(&self, request: &StoreRequest) -> Result<StoreResponse, StoreError> {
        let url = format!("{}/{}/_search", self.base_url, request.index);
        let body = render_request(request);
        debug!("POST {} {}", url, body);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Search request to {} failed: {}", url, e);
                if e.is_timeout() {
                    StoreError::Transport(format!("request timeout: {}", e))
                } else if e.is_connect() {
                    StoreError::Transport(format!("failed to connect: {}", e))
                } else {
                    StoreError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Store returned {}: {}", status, body);
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<StoreResponse>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

// ============================================================================
// DSL rendering
// ============================================================================

fn keyed(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Full `_search` request body.
pub fn render_request(request: &StoreRequest) -> Value {
    let mut body = match &request.body {
        SearchBody::Query(plan) => json!({
            "query": render_query(plan),
            "sort": render_sort(plan),
        }),
        SearchBody::Aggregation {
            query,
            aggregations,
        } => {
            let mut body = json!({ "query": render_query(query) });
            if !aggregations.is_empty() {
                body["aggs"] = render_aggregations(aggregations);
            }
            body
        }
    };

    body["size"] = json!(request.size);
    body["from"] = json!(request.from);
    if let Some(fields) = &request.source_fields {
        body["_source"] = json!(fields);
    }
    body
}

pub fn render_query(plan: &QueryPlan) -> Value {
    if plan.is_match_all() {
        return json!({ "match_all": {} });
    }
    let must: Vec<Value> = plan.must.iter().map(render_clause).collect();
    json!({ "bool": { "must": must } })
}

fn render_sort(plan: &QueryPlan) -> Value {
    let order = if plan.sort.descending { "desc" } else { "asc" };
    json!([keyed(&plan.sort.field, json!({ "order": order }))])
}

fn render_clause(clause: &Clause) -> Value {
    match clause {
        Clause::FreeText(text) => json!({ "query_string": { "query": text } }),
        Clause::GeoShape { field, shape } => {
            let shape = match shape {
                Shape::Circle { center, radius } => json!({
                    "type": "circle",
                    "coordinates": center,
                    "radius": radius,
                }),
                Shape::Geometry(geometry) => geometry.clone(),
            };
            json!({
                "geo_shape": keyed(field, json!({ "shape": shape, "relation": "intersects" }))
            })
        }
        Clause::Any(clauses) => {
            let should: Vec<Value> = clauses.iter().map(render_clause).collect();
            json!({ "bool": { "should": should } })
        }
        Clause::Range { field, gte, lte } => {
            let mut bounds = Map::new();
            if let Some(gte) = gte {
                bounds.insert("gte".into(), gte.clone());
            }
            if let Some(lte) = lte {
                bounds.insert("lte".into(), lte.clone());
            }
            json!({ "range": keyed(field, Value::Object(bounds)) })
        }
        Clause::Term { field, value } => json!({
            "match": keyed(field, json!({
                "query": value,
                "lenient": false,
                "zero_terms_query": "none",
            }))
        }),
    }
}

pub fn render_aggregations(plan: &AggregationPlan) -> Value {
    let aggs: Map<String, Value> = plan
        .aggregations
        .iter()
        .map(|agg| {
            let rendered = match &agg.kind {
                AggregationKind::DateHistogram { field } => json!({
                    "date_histogram": {
                        "field": field,
                        "calendar_interval": "day",
                        "format": DATE_BUCKET_FORMAT,
                        "order": { "_key": "desc" },
                    }
                }),
                AggregationKind::Terms { field } => json!({ "terms": { "field": field } }),
            };
            (agg.name.clone(), rendered)
        })
        .collect();
    Value::Object(aggs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::compile_aggregation;
    use crate::query::{compile, ParameterMap};

    fn params(value: Value) -> ParameterMap {
        value.as_object().cloned().unwrap()
    }

    fn search_request(plan: QueryPlan) -> StoreRequest {
        StoreRequest {
            index: "sat-api".into(),
            body: SearchBody::Query(plan),
            size: 1,
            from: 0,
            source_fields: None,
        }
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("localhost:9200"), "http://localhost:9200");
        assert_eq!(normalize_host("https://es.example.com/"), "https://es.example.com");
    }

    #[test]
    fn test_match_all_with_date_sort() {
        let body = render_request(&search_request(QueryPlan::match_all()));
        assert_eq!(
            body,
            json!({
                "query": { "match_all": {} },
                "sort": [{ "date": { "order": "desc" } }],
                "size": 1,
                "from": 0
            })
        );
    }

    #[test]
    fn test_free_text() {
        let plan = compile(&params(json!({ "search": "scene_id:LC8*" }))).unwrap();
        let body = render_request(&search_request(plan));
        assert_eq!(
            body["query"],
            json!({ "bool": { "must": [{ "query_string": { "query": "scene_id:LC8*" } }] } })
        );
    }

    #[test]
    fn test_contains_circle() {
        let plan = compile(&params(json!({ "contains": "10,20" }))).unwrap();
        assert_eq!(
            render_query(&plan)["bool"]["must"][0],
            json!({
                "geo_shape": {
                    "data_geometry": {
                        "shape": { "type": "circle", "coordinates": [10.0, 20.0], "radius": "1km" },
                        "relation": "intersects"
                    }
                }
            })
        );
    }

    #[test]
    fn test_intersects_should_group() {
        let polygon = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
        });
        let plan = compile(&params(json!({ "intersects": polygon }))).unwrap();
        let group = &render_query(&plan)["bool"]["must"][0];
        let should = group["bool"]["should"].as_array().unwrap();
        assert_eq!(should.len(), 1);
        let shape = &should[0]["geo_shape"]["data_geometry"]["shape"];
        assert_eq!(shape["type"], "polygon");
    }

    #[test]
    fn test_range_and_match() {
        let plan = compile(&params(json!({ "cloud_to": "20", "sensor": "landsat-8" }))).unwrap();
        let must = render_query(&plan)["bool"]["must"].clone();
        assert_eq!(must[0], json!({ "range": { "cloud_coverage": { "lte": "20" } } }));
        assert_eq!(
            must[1],
            json!({
                "match": {
                    "satellite_name": {
                        "query": "landsat-8",
                        "lenient": false,
                        "zero_terms_query": "none"
                    }
                }
            })
        );
    }

    #[test]
    fn test_source_fields() {
        let mut request = search_request(QueryPlan::match_all());
        request.source_fields = Some(vec!["date".into(), "thumbnail".into()]);
        assert_eq!(render_request(&request)["_source"], json!(["date", "thumbnail"]));
    }

    #[test]
    fn test_aggregation_request() {
        let p = params(json!({ "fields": "satellite_name,date" }));
        let request = StoreRequest {
            index: "sat-api".into(),
            body: SearchBody::Aggregation {
                query: compile(&p).unwrap(),
                aggregations: compile_aggregation(&p),
            },
            size: 0,
            from: 0,
            source_fields: None,
        };
        let body = render_request(&request);
        assert_eq!(body["size"], 0);
        assert!(body.get("sort").is_none());
        assert_eq!(body["aggs"]["terms_satellite_name"], json!({ "terms": { "field": "satellite_name" } }));
        assert_eq!(
            body["aggs"]["date_histogram"]["date_histogram"]["order"],
            json!({ "_key": "desc" })
        );
        assert_eq!(body["aggs"]["date_histogram"]["date_histogram"]["format"], "yyyy-MM-dd");
    }
}
