use crate::types::ErrorResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use thiserror::Error;

pub const FETCH_ERROR_MESSAGE: &str = "An error occurred while fetching data";
pub const GENERATE_ERROR_MESSAGE: &str = "An error occurred while generating map data";

/// Failures at the gateway boundary. The `Display` text is for server logs only.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(#[source] reqwest::Error),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(#[source] reqwest::Error),

    #[error("upstream responded with {0}")]
    UpstreamBadStatus(StatusCode),

    #[error("map data process failed: {0}")]
    Subprocess(#[from] ProcessError),
}

impl GatewayError {
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout(err)
        } else {
            GatewayError::UpstreamUnreachable(err)
        }
    }

    fn client_message(&self) -> &'static str {
        match self {
            GatewayError::Subprocess(_) => GENERATE_ERROR_MESSAGE,
            _ => FETCH_ERROR_MESSAGE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.client_message().to_string(),
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read process output: {0}")]
    Io(#[from] std::io::Error),

    #[error("process exited with code {code:?}, stderr: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("process did not exit within {0:?}")]
    TimedOut(Duration),
}

/// Failures decoding a single layer value.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("expected a FeatureCollection, found {0}")]
    NotFeatureCollection(&'static str),

    #[error("expected an encoded string or an object, found {0}")]
    UnexpectedValue(&'static str),
}

/// Failures of a renderer fetch as a whole.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("a map data fetch is already in flight")]
    InFlight,

    #[error("map data request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("map data is not a layer mapping: {0}")]
    Malformed(String),
}
