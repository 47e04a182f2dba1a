//! Client side of the pipeline: fetch the gateway's layer mapping, decode it,
//! and turn each layer into styled features.

use crate::config::RendererConfig;
use crate::data::decode_body;
use crate::error::FetchError;
use crate::style::compute_style;
use crate::types::{FeatureCollectionMap, LayerKind, StyledFeature, StyledLayer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

pub struct MapRenderer {
    client: reqwest::Client,
    endpoint: String,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the fetch finishes or is dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MapRenderer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &RendererConfig) -> reqwest::Result<Self> {
        Self::new(config.endpoint.clone(), config.timeout())
    }

    /// One request to the map-data endpoint, every layer decoded.
    ///
    /// Rejects with [`FetchError::InFlight`] while another fetch on this
    /// renderer is still running.
    pub async fn fetch_and_decode(&self) -> Result<FeatureCollectionMap, FetchError> {
        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(FetchError::InFlight)?;

        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        decode_body(&body)
    }
}

/// One styled layer per key, counties drawn before state borders.
pub fn render(layers: &FeatureCollectionMap) -> Vec<StyledLayer> {
    let mut rendered: Vec<StyledLayer> = layers
        .iter()
        .map(|(key, collection)| {
            let kind = LayerKind::from_key(key);
            let features = collection
                .features
                .iter()
                .map(|feature| StyledFeature {
                    style: compute_style(feature, kind),
                    feature: feature.clone(),
                })
                .collect();

            StyledLayer {
                key: key.clone(),
                kind,
                features,
            }
        })
        .collect();

    rendered.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.key.cmp(&b.key)));
    rendered
}

/// Decoded layers owned by one activation of a map view.
#[derive(Debug, Default)]
pub struct MapView {
    layers: FeatureCollectionMap,
}

impl MapView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches once and replaces whatever the view held. A failed fetch
    /// leaves the view empty.
    pub async fn activate(&mut self, renderer: &MapRenderer) -> usize {
        self.layers = match renderer.fetch_and_decode().await {
            Ok(layers) => layers,
            Err(e) => {
                error!("Error fetching data: {e}");
                FeatureCollectionMap::new()
            }
        };

        info!("Map view activated with {} layers", self.layers.len());
        self.layers.len()
    }

    pub fn layers(&self) -> &FeatureCollectionMap {
        &self.layers
    }

    pub fn render(&self) -> Vec<StyledLayer> {
        render(&self.layers)
    }
}
