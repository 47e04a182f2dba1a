use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Serves `app` on an ephemeral local port for the lifetime of the test runtime.
pub async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn county_collection(colors: &[Option<&str>]) -> serde_json::Value {
    let features: Vec<serde_json::Value> = colors
        .iter()
        .enumerate()
        .map(|(i, color)| {
            let x = i as f64;
            let mut properties = serde_json::json!({ "NAME": format!("County {i}") });
            if let Some(color) = color {
                properties["risk_color"] = serde_json::json!(color);
            }
            serde_json::json!({
                "type": "Feature",
                "properties": properties,
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[x, 0.0], [x + 1.0, 0.0], [x + 1.0, 1.0], [x, 1.0], [x, 0.0]]]
                }
            })
        })
        .collect();

    serde_json::json!({ "type": "FeatureCollection", "features": features })
}
