use crate::error::{DecodeError, FetchError};
use crate::types::{FeatureCollectionMap, LayerPayload};
use geojson::{FeatureCollection, GeoJson};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::warn;

impl LayerPayload {
    /// Classifies a raw layer value. Anything other than a string or an
    /// object can never become a FeatureCollection.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(s) => Ok(LayerPayload::Encoded(s)),
            Value::Object(object) => {
                let collection = into_feature_collection(GeoJson::from_json_object(object)?)?;
                Ok(LayerPayload::Decoded(collection))
            }
            other => Err(DecodeError::UnexpectedValue(json_kind(&other))),
        }
    }

    pub fn decode(self) -> Result<FeatureCollection, DecodeError> {
        match self {
            LayerPayload::Encoded(s) => into_feature_collection(GeoJson::from_str(&s)?),
            LayerPayload::Decoded(collection) => Ok(collection),
        }
    }
}

fn into_feature_collection(geojson: GeoJson) -> Result<FeatureCollection, DecodeError> {
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        GeoJson::Feature(_) => Err(DecodeError::NotFeatureCollection("Feature")),
        GeoJson::Geometry(_) => Err(DecodeError::NotFeatureCollection("Geometry")),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Resolves every layer of a raw mapping. Layers that fail to decode are
/// logged and left out; their siblings are unaffected.
pub fn decode_layers(raw: Map<String, Value>) -> FeatureCollectionMap {
    let mut layers = FeatureCollectionMap::new();

    for (key, value) in raw {
        match LayerPayload::from_value(value).and_then(LayerPayload::decode) {
            Ok(collection) => {
                layers.insert(key, collection);
            }
            Err(e) => warn!("Error parsing JSON for key {key}: {e}"),
        }
    }

    layers
}

/// Parses a gateway response body into decoded layers.
pub fn decode_body(body: &[u8]) -> Result<FeatureCollectionMap, FetchError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    match value {
        Value::Object(raw) => Ok(decode_layers(raw)),
        other => Err(FetchError::Malformed(format!(
            "expected an object of layers, found {}",
            json_kind(&other)
        ))),
    }
}
