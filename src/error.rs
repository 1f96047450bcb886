//! Error types for query compilation, geometry validation and store access.

use thiserror::Error;

/// Geometry validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Input is not JSON, or not structurally valid GeoJSON.
    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    /// A polygon ring crosses itself (or another ring of the same polygon).
    #[error("Self-intersecting polygon: {count} intersection point(s)")]
    SelfIntersectingPolygon { count: usize },
}

/// Document store failures. Opaque to the core; surfaced unchanged.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or the request timed out.
    #[error("store request failed: {0}")]
    Transport(String),

    /// The store answered with a non-success status.
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The store answered with a body we could not decode.
    #[error("failed to decode store response: {0}")]
    Decode(String),
}

/// Errors surfaced to the caller of a search operation.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    #[error("Self-intersecting polygon: {count} intersection point(s)")]
    SelfIntersectingPolygon { count: usize },

    /// `contains` is malformed or out of range.
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    /// A control parameter could not be interpreted.
    #[error("Invalid value for '{name}': {value}")]
    InvalidParameter { name: String, value: String },

    /// The request cannot be evaluated as configured (e.g. zero-area AOI).
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GeometryError> for SearchError {
    fn from(err: GeometryError) -> Self {
        match err {
            GeometryError::InvalidGeoJson(msg) => SearchError::InvalidGeoJson(msg),
            GeometryError::SelfIntersectingPolygon { count } => {
                SearchError::SelfIntersectingPolygon { count }
            }
        }
    }
}

impl SearchError {
    /// Stable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            SearchError::InvalidGeoJson(_) => "InvalidGeoJson",
            SearchError::SelfIntersectingPolygon { .. } => "SelfIntersectingPolygon",
            SearchError::InvalidCoordinates(_) => "InvalidCoordinates",
            SearchError::InvalidParameter { .. } => "InvalidParameter",
            SearchError::Configuration(_) => "ConfigurationError",
            SearchError::Store(_) => "StoreError",
        }
    }

    /// True when the caller's input caused the failure.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SearchError::Store(_))
    }
}

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;
