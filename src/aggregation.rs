//! Aggregation plans for the count endpoint.

use crate::query::{value_text, ParameterMap, DATE_FIELD};

/// Bucket key format of the date histogram (renders as `YYYY-MM-DD`).
pub const DATE_BUCKET_FORMAT: &str = "yyyy-MM-dd";

/// Fields that can be aggregated on. Everything except the date field gets
/// a terms aggregation.
const AGGREGATABLE_FIELDS: &[&str] = &[
    DATE_FIELD,
    "satellite_name",
    "latitude_band",
    "utm_zone",
    "product_path",
    "grid_square",
    "sensing_orbit_number",
    "sensing_orbit_direction",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationKind {
    /// Daily buckets, newest first.
    DateHistogram { field: String },
    Terms { field: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub name: String,
    pub kind: AggregationKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationPlan {
    pub aggregations: Vec<Aggregation>,
}

impl AggregationPlan {
    pub fn is_empty(&self) -> bool {
        self.aggregations.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Aggregation> {
        self.aggregations.iter().find(|a| a.name == name)
    }
}

/// Build aggregations from the comma-separated `fields` parameter.
///
/// Unknown field names are skipped. Without `fields` the plan is empty.
pub fn compile_aggregation(params: &ParameterMap) -> AggregationPlan {
    let Some(fields) = params.get("fields").and_then(value_text) else {
        return AggregationPlan::default();
    };

    let mut plan = AggregationPlan::default();
    for field in fields.split(',').map(str::trim) {
        if !AGGREGATABLE_FIELDS.contains(&field) {
            continue;
        }
        let aggregation = if field == DATE_FIELD {
            Aggregation {
                name: format!("{}_histogram", field),
                kind: AggregationKind::DateHistogram {
                    field: field.to_string(),
                },
            }
        } else {
            Aggregation {
                name: format!("terms_{}", field),
                kind: AggregationKind::Terms {
                    field: field.to_string(),
                },
            }
        };
        if plan.get(&aggregation.name).is_none() {
            plan.aggregations.push(aggregation);
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_fields(fields: &str) -> ParameterMap {
        let mut params = ParameterMap::new();
        params.insert("fields".into(), json!(fields));
        params
    }

    #[test]
    fn test_date_and_terms() {
        let plan = compile_aggregation(&with_fields("satellite_name,date"));
        assert_eq!(plan.aggregations.len(), 2);
        assert_eq!(
            plan.get("terms_satellite_name").map(|a| &a.kind),
            Some(&AggregationKind::Terms { field: "satellite_name".into() })
        );
        assert_eq!(
            plan.get("date_histogram").map(|a| &a.kind),
            Some(&AggregationKind::DateHistogram { field: "date".into() })
        );
    }

    #[test]
    fn test_unknown_fields_dropped() {
        let plan = compile_aggregation(&with_fields("nope,utm_zone,,cloud_coverage"));
        let names: Vec<_> = plan.aggregations.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["terms_utm_zone"]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let plan = compile_aggregation(&with_fields("date,date,grid_square"));
        assert_eq!(plan.aggregations.len(), 2);
    }

    #[test]
    fn test_no_fields_is_empty() {
        assert!(compile_aggregation(&ParameterMap::new()).is_empty());
    }
}
