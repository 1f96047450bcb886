//! Document store capability consumed by the search orchestrator.

use crate::aggregation::AggregationPlan;
use crate::error::StoreError;
use crate::query::QueryPlan;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// What to run against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchBody {
    Query(QueryPlan),
    Aggregation {
        query: QueryPlan,
        aggregations: AggregationPlan,
    },
}

/// A single search round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRequest {
    pub index: String,
    pub body: SearchBody,
    pub size: u64,
    pub from: u64,
    /// Source fields to return; `None` returns whole documents.
    pub source_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreResponse {
    pub hits: Hits,
    #[serde(default)]
    pub aggregations: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hits {
    #[serde(deserialize_with = "deserialize_total")]
    pub total: u64,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_source", default)]
    pub source: Value,
}

/// Accepts the hit total either as a bare count or as `{"value": n, ...}`.
fn deserialize_total<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct TotalVisitor;

    impl<'de> de::Visitor<'de> for TotalVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a count or an object with a `value` count")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v).map_err(|_| E::custom("negative hit total"))
        }

        fn visit_map<A: de::MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut total = None;
            while let Some(key) = map.next_key::<String>()? {
                if key == "value" {
                    total = Some(map.next_value::<u64>()?);
                } else {
                    map.next_value::<de::IgnoredAny>()?;
                }
            }
            total.ok_or_else(|| de::Error::missing_field("value"))
        }
    }

    deserializer.deserialize_any(TotalVisitor)
}

/// A searchable document store. One implementation is chosen at startup.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn search(&self, request: &StoreRequest) -> Result<StoreResponse, StoreError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_numeric_total() {
        let json = r#"{
            "hits": {"total": 3, "hits": [{"_source": {"scene_id": "a"}}]}
        }"#;
        let resp: StoreResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.hits.total, 3);
        assert_eq!(resp.hits.hits[0].source["scene_id"], "a");
        assert!(resp.aggregations.is_none());
    }

    #[test]
    fn test_deserialize_object_total() {
        let json = r#"{
            "took": 2,
            "hits": {"total": {"value": 42, "relation": "eq"}, "hits": []},
            "aggregations": {"terms_utm_zone": {"buckets": []}}
        }"#;
        let resp: StoreResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.hits.total, 42);
        assert!(resp.aggregations.is_some());
    }
}
