//! Query compilation: flat request parameters to a structured query plan.
//!
//! Every parameter is classified once by its name into a [`Param`]. The
//! classified parameters are folded into buckets, and clauses are built from
//! the buckets in a fixed order:
//!
//! 1. `search` (free text) - when present and non-empty it is the only clause
//! 2. `contains` - a 1 km circle around a `lon,lat` point
//! 3. `intersects` - one geo-shape clause per geometry, OR'd together
//! 4. `*_from` / `*_to` - inclusive range clauses
//! 5. aliased term keys (`scene_id`, `sensor`)
//! 6. any other key - exact-match term clause on the field of the same name
//!
//! Clauses from steps 2-6 are AND'ed. A plan without clauses matches every
//! document. All plans sort by [`DATE_FIELD`] descending.

use crate::error::{Result, SearchError};
use crate::geometry::{self, GeoOps};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flat request parameters, as received from the query string or body.
pub type ParameterMap = serde_json::Map<String, Value>;

/// Document field holding each scene's footprint geometry.
pub const FOOTPRINT_FIELD: &str = "data_geometry";

/// Document field results are sorted by.
pub const DATE_FIELD: &str = "date";

/// Radius of the circle used for `contains` point queries.
pub const CONTAINS_RADIUS: &str = "1km";

/// Keys that steer pagination, projection or post-filtering.
pub const CONTROL_KEYS: &[&str] = &["limit", "page", "skip", "fields", "aoi_coverage_percentage"];

/// Parameter name to document field.
const TERM_ALIASES: &[(&str, &str)] = &[("scene_id", "scene_id"), ("sensor", "satellite_name")];

// ============================================================================
// Query Plan
// ============================================================================

/// Shape of a geo-shape clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle { center: [f64; 2], radius: String },
    /// GeoJSON geometry object, `type` lower-cased.
    Geometry(Value),
}

/// A single condition of a query plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    FreeText(String),
    GeoShape { field: String, shape: Shape },
    /// At least one of the nested clauses must match.
    Any(Vec<Clause>),
    /// Inclusive bounds; string bounds are lower-cased.
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    /// Exact, non-lenient match. Never matches on zero terms.
    Term { field: String, value: Value },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Default for Sort {
    fn default() -> Self {
        Sort {
            field: DATE_FIELD.to_string(),
            descending: true,
        }
    }
}

/// Conjunction of clauses. Empty means "match everything".
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub must: Vec<Clause>,
    pub sort: Sort,
}

impl QueryPlan {
    pub fn new(must: Vec<Clause>) -> Self {
        QueryPlan {
            must,
            sort: Sort::default(),
        }
    }

    #[cfg(test)]
    pub fn match_all() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_match_all(&self) -> bool {
        self.must.is_empty()
    }
}

// ============================================================================
// Parameter classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeEnd {
    From,
    To,
}

/// A request parameter, tagged by what its name means.
#[derive(Debug, Clone, PartialEq)]
pub enum Param<'a> {
    /// Pagination/projection keys, and an empty `search`.
    Control,
    FreeText(String),
    Contains(&'a Value),
    Intersects(&'a Value),
    /// `group` is the parameter stem; bounds pair up within a group.
    Range {
        group: String,
        field: String,
        end: RangeEnd,
        value: &'a Value,
    },
    /// A key from the alias table.
    Alias { field: &'static str, value: &'a Value },
    Term { field: &'a str, value: &'a Value },
}

/// Classify one parameter by its name.
pub fn classify<'a>(key: &'a str, value: &'a Value) -> Param<'a> {
    if CONTROL_KEYS.contains(&key) {
        return Param::Control;
    }

    match key {
        "search" => {
            return match value_text(value) {
                Some(text) if !text.is_empty() => Param::FreeText(text),
                _ => Param::Control,
            };
        }
        "contains" => return Param::Contains(value),
        "intersects" => return Param::Intersects(value),
        "cloud_from" | "cloud_to" => {
            let end = if key == "cloud_from" { RangeEnd::From } else { RangeEnd::To };
            return Param::Range {
                group: "cloud".to_string(),
                field: "cloud_coverage".to_string(),
                end,
                value,
            };
        }
        _ => {}
    }

    let range = [("_from", RangeEnd::From), ("_to", RangeEnd::To)]
        .into_iter()
        .find_map(|(suffix, end)| {
            key.strip_suffix(suffix)
                .filter(|base| !base.is_empty())
                .map(|base| (base, end))
        });
    if let Some((base, end)) = range {
        return Param::Range {
            group: base.to_string(),
            field: base.to_string(),
            end,
            value,
        };
    }

    if let Some((_, field)) = TERM_ALIASES.iter().find(|(param, _)| *param == key) {
        return Param::Alias {
            field: *field,
            value,
        };
    }

    Param::Term { field: key, value }
}

#[derive(Debug)]
struct RangeBounds<'a> {
    field: String,
    from: Option<&'a Value>,
    to: Option<&'a Value>,
}

/// Classified parameters grouped by kind.
#[derive(Debug, Default)]
struct Buckets<'a> {
    free_text: Option<String>,
    contains: Option<&'a Value>,
    intersects: Option<&'a Value>,
    /// Keyed by range group, so `cloud_*` and `cloud_coverage_*` stay apart.
    ranges: BTreeMap<String, RangeBounds<'a>>,
    aliases: Vec<(&'static str, &'a Value)>,
    terms: Vec<(&'a str, &'a Value)>,
}

impl<'a> Buckets<'a> {
    fn fold(params: &'a ParameterMap) -> Self {
        params
            .iter()
            .map(|(key, value)| classify(key, value))
            .fold(Buckets::default(), |mut b, param| {
                match param {
                    Param::Control => {}
                    Param::FreeText(text) => b.free_text = Some(text),
                    Param::Contains(v) => b.contains = Some(v),
                    Param::Intersects(v) => b.intersects = Some(v),
                    Param::Range {
                        group,
                        field,
                        end,
                        value,
                    } => {
                        let bounds = b.ranges.entry(group).or_insert_with(|| RangeBounds {
                            field,
                            from: None,
                            to: None,
                        });
                        match end {
                            RangeEnd::From => bounds.from = Some(value),
                            RangeEnd::To => bounds.to = Some(value),
                        }
                    }
                    Param::Alias { field, value } => b.aliases.push((field, value)),
                    Param::Term { field, value } => b.terms.push((field, value)),
                }
                b
            })
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// Compile request parameters into a query plan.
pub fn compile(params: &ParameterMap) -> Result<QueryPlan> {
    let mut buckets = Buckets::fold(params);

    if let Some(text) = buckets.free_text {
        return Ok(QueryPlan::new(vec![Clause::FreeText(text)]));
    }

    let mut must = Vec::new();

    if let Some(value) = buckets.contains {
        must.push(contains_clause(value)?);
    }

    if let Some(value) = buckets.intersects {
        must.push(intersects_clause(value)?);
    }

    for bounds in buckets.ranges.into_values() {
        must.push(Clause::Range {
            field: bounds.field,
            gte: bounds.from.map(lowercase_bound),
            lte: bounds.to.map(lowercase_bound),
        });
    }

    // Aliases in table order.
    buckets
        .aliases
        .sort_by_key(|(field, _)| TERM_ALIASES.iter().position(|(_, f)| f == field));
    for (field, value) in buckets.aliases {
        must.push(Clause::Term {
            field: field.to_string(),
            value: value.clone(),
        });
    }

    for (field, value) in buckets.terms {
        must.push(Clause::Term {
            field: field.to_string(),
            value: value.clone(),
        });
    }

    Ok(QueryPlan::new(must))
}

/// Text of a scalar parameter value.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lowercase_bound(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        other => other.clone(),
    }
}

fn contains_clause(value: &Value) -> Result<Clause> {
    let raw = value_text(value).unwrap_or_else(|| value.to_string());
    let invalid = || SearchError::InvalidCoordinates(raw.clone());

    let well_formed = !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | ','));
    if !well_formed {
        return Err(invalid());
    }

    let coords = raw
        .split(',')
        .map(|part| part.parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;

    let &[lon, lat] = coords.as_slice() else {
        return Err(invalid());
    };

    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(invalid());
    }

    Ok(Clause::GeoShape {
        field: FOOTPRINT_FIELD.to_string(),
        shape: Shape::Circle {
            center: [lon, lat],
            radius: CONTAINS_RADIUS.to_string(),
        },
    })
}

fn intersects_clause(value: &Value) -> Result<Clause> {
    let valid = geometry::validate(value, &GeoOps)?;

    let shapes = valid
        .components()
        .into_iter()
        .map(|g| -> Result<Clause> {
            let mut shape = serde_json::to_value(g)
                .map_err(|e| SearchError::InvalidGeoJson(e.to_string()))?;
            if let Some(obj) = shape.as_object_mut() {
                obj.insert(
                    "type".to_string(),
                    Value::String(geometry::type_name(g).to_lowercase()),
                );
                obj.remove("bbox");
            }
            Ok(Clause::GeoShape {
                field: FOOTPRINT_FIELD.to_string(),
                shape: Shape::Geometry(shape),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Clause::Any(shapes))
}
