use geojson::{Feature, FeatureCollection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decoded layers keyed by layer name ("us", "states", ...).
pub type FeatureCollectionMap = BTreeMap<String, FeatureCollection>;

/// A single layer value as it arrives on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerPayload {
    /// A FeatureCollection serialized to a JSON string.
    Encoded(String),
    Decoded(FeatureCollection),
}

/// Visual role of a layer, derived from its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    // Declaration order is draw order: counties first, state borders on top.
    County,
    State,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerStyle {
    pub fill_color: String,
    pub stroke_weight: f64,
    pub stroke_color: String,
    pub opacity: f64,
    pub dash_array: String,
    pub fill_opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StyledFeature {
    pub feature: Feature,
    pub style: LayerStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StyledLayer {
    pub key: String,
    pub kind: LayerKind,
    pub features: Vec<StyledFeature>,
}

/// Entry of the static `/api/mapdata` fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDataPoint {
    pub coordinates: Vec<[f64; 2]>,
    pub risk_color: String,
}

/// Client-safe error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
