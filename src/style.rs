use crate::types::{LayerKind, LayerStyle};
use geojson::Feature;

/// Fill used when a feature carries no usable `risk_color`.
pub const DEFAULT_FILL_COLOR: &str = "gray";

const FILL_OPACITY: f64 = 0.7;
const OPACITY: f64 = 1.0;
const DASH_ARRAY: &str = "3";

impl LayerKind {
    pub fn from_key(key: &str) -> Self {
        if key.to_ascii_lowercase().contains("state") {
            LayerKind::State
        } else {
            LayerKind::County
        }
    }

    fn stroke(self) -> (f64, &'static str) {
        match self {
            LayerKind::State => (5.0, "black"),
            LayerKind::County => (2.0, "white"),
        }
    }
}

pub fn risk_color(feature: &Feature) -> Option<&str> {
    feature
        .properties
        .as_ref()
        .and_then(|props| props.get("risk_color"))
        .and_then(|value| value.as_str())
        .filter(|color| !color.trim().is_empty())
}

pub fn compute_style(feature: &Feature, kind: LayerKind) -> LayerStyle {
    let (stroke_weight, stroke_color) = kind.stroke();

    LayerStyle {
        fill_color: risk_color(feature).unwrap_or(DEFAULT_FILL_COLOR).to_string(),
        stroke_weight,
        stroke_color: stroke_color.to_string(),
        opacity: OPACITY,
        dash_array: DASH_ARRAY.to_string(),
        fill_opacity: FILL_OPACITY,
    }
}
