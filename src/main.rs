pub mod types;
pub mod config;
pub mod error;
pub mod data;
pub mod style;
pub mod upstream;
pub mod subprocess;
pub mod renderer;
pub mod raster;
pub mod server;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the map data gateway
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Fetch map data through the gateway and write the styled layers
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Styled layers as JSON
        #[arg(short, long, value_name = "FILE", default_value = "layers.json")]
        output: PathBuf,
        /// Also rasterize the map to a PNG
        #[arg(long, value_name = "FILE")]
        png: Option<PathBuf>,
        #[arg(long, default_value_t = 2000)]
        width: u32,
        #[arg(long, default_value_t = 1200)]
        height: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fire_risk_map=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load(&config)?;
            server::start_server(app_config).await?;
        }
        Commands::Render { config, output, png, width, height } => {
            if png.is_some() {
                raster::check_dimensions(width, height)?;
            }
            let app_config = config::AppConfig::load(&config)?;
            let renderer = renderer::MapRenderer::from_config(&app_config.renderer)
                .context("Failed to build renderer HTTP client")?;

            info!("Fetching map data from {}", app_config.renderer.endpoint);
            let mut view = renderer::MapView::new();
            view.activate(&renderer).await;
            let layers = view.render();

            let file = File::create(&output)
                .with_context(|| format!("Failed to create {:?}", output))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &layers)
                .context("Failed to write styled layers")?;
            info!("Wrote {} layers to {:?}", layers.len(), output);

            if let Some(png) = png {
                let img = raster::render_snapshot(&layers, width, height);
                raster::save_png(&img, &png)?;
                info!("Wrote snapshot to {:?}", png);
            }
        }
    }

    Ok(())
}
