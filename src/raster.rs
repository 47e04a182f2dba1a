//! PNG snapshot of rendered layers.

use crate::types::{LayerStyle, StyledFeature, StyledLayer};
use anyhow::{bail, Context, Result};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::{Geometry, MultiPolygon, Rect};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::path::Path;
use tracing::{debug, info};

pub const BACKGROUND: Rgba<u8> = Rgba([0x0b, 0x0e, 0x12, 255]);
const FALLBACK_COLOR: Rgba<u8> = Rgba([128, 128, 128, 255]);
const MAX_LATITUDE: f64 = 85.051_128_78;
const PADDING_FRACTION: f64 = 0.03;
/// Largest accepted snapshot edge, in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

type Ring = Vec<(f64, f64)>;

/// A feature's polygons in pixel space, ready to draw.
struct Shape<'a> {
    rings: Vec<Ring>,
    style: &'a LayerStyle,
}

/// Rasterizes layers in the order given. Each layer is filled first and
/// then outlined, so later layers' borders sit on top.
pub fn render_snapshot(layers: &[StyledLayer], width: u32, height: u32) -> RgbaImage {
    let mut img: RgbaImage = ImageBuffer::from_pixel(width, height, BACKGROUND);

    let geometries: Vec<Vec<(MultiPolygon<f64>, &LayerStyle)>> = layers
        .iter()
        .map(|layer| {
            layer
                .features
                .par_iter()
                .filter_map(|styled| polygons_of(styled).map(|mp| (mp, &styled.style)))
                .collect()
        })
        .collect();

    let Some(bounds) = combined_bounds(geometries.iter().flatten().map(|(mp, _)| mp)) else {
        info!("Nothing to draw, writing background only");
        return img;
    };
    let projection = Projection::fit(&bounds, width, height);

    for (layer, polygons) in layers.iter().zip(&geometries) {
        debug!("Drawing layer {} ({} polygons)", layer.key, polygons.len());

        let shapes: Vec<Shape> = polygons
            .par_iter()
            .map(|(mp, style)| Shape {
                rings: projection.rings(mp),
                style: *style,
            })
            .collect();

        for shape in &shapes {
            fill_even_odd(&mut img, &shape.rings, parse_color(&shape.style.fill_color), shape.style.fill_opacity);
        }
        for shape in &shapes {
            let color = parse_color(&shape.style.stroke_color);
            let dashes = parse_dash_array(&shape.style.dash_array);
            for ring in &shape.rings {
                stroke_ring(&mut img, ring, color, shape.style.opacity, shape.style.stroke_weight, &dashes);
            }
        }
    }

    draw_legend(&mut img, layers);
    img
}

/// Rejects sizes that are empty or would need an unreasonable buffer.
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        bail!("Snapshot size must be non-zero, got {width}x{height}");
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        bail!("Snapshot size {width}x{height} exceeds the {MAX_DIMENSION}px limit");
    }
    Ok(())
}

/// Distinct fill colors in first-seen order, one for each legend swatch.
fn legend_colors(layers: &[StyledLayer]) -> Vec<&str> {
    let mut colors: Vec<&str> = Vec::new();
    for styled in layers.iter().flat_map(|layer| &layer.features) {
        let color = styled.style.fill_color.as_str();
        if !colors.contains(&color) {
            colors.push(color);
        }
    }
    colors
}

/// Opaque swatches stacked down the top-right corner.
fn draw_legend(img: &mut RgbaImage, layers: &[StyledLayer]) {
    let swatch = (img.width().min(img.height()) / 25).clamp(6, 32) as i64;
    let margin = swatch / 2;
    let left = img.width() as i64 - margin - swatch;

    for (i, color) in legend_colors(layers).into_iter().enumerate() {
        let top = margin + i as i64 * (swatch + margin);
        if top + swatch > img.height() as i64 {
            break;
        }
        let color = parse_color(color);
        for y in top..top + swatch {
            for x in left..left + swatch {
                blend(img, x, y, color, 1.0);
            }
        }
    }
}

pub fn save_png(img: &RgbaImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("Failed to save snapshot {:?}", path))
}

fn polygons_of(styled: &StyledFeature) -> Option<MultiPolygon<f64>> {
    let geometry = styled.feature.geometry.as_ref()?;
    let geometry: Geometry<f64> = geometry.value.clone().try_into().ok()?;

    match geometry {
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        _ => None, // points and lines carry no fill
    }
}

fn combined_bounds<'a>(polygons: impl Iterator<Item = &'a MultiPolygon<f64>>) -> Option<Rect<f64>> {
    polygons
        .filter_map(|mp| mp.bounding_rect())
        .reduce(|a, b| {
            Rect::new(
                geo::coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                geo::coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
            )
        })
}

/// Web Mercator fitted to a lon/lat box, aspect ratio preserved.
struct Projection {
    origin_x: f64,
    origin_y: f64,
    scale: f64,
    offset_x: f64,
    offset_y: f64,
}

impl Projection {
    fn fit(bounds: &Rect<f64>, width: u32, height: u32) -> Self {
        let (min_x, min_y) = mercator(bounds.min().x, bounds.min().y);
        let (max_x, max_y) = mercator(bounds.max().x, bounds.max().y);

        let pad_x = width as f64 * PADDING_FRACTION;
        let pad_y = height as f64 * PADDING_FRACTION;
        let usable_w = (width as f64 - 2.0 * pad_x).max(1.0);
        let usable_h = (height as f64 - 2.0 * pad_y).max(1.0);

        let span_x = max_x - min_x;
        let span_y = max_y - min_y;
        let scale = match (span_x > 0.0, span_y > 0.0) {
            (true, true) => (usable_w / span_x).min(usable_h / span_y),
            (true, false) => usable_w / span_x,
            (false, true) => usable_h / span_y,
            (false, false) => 1.0,
        };

        Self {
            origin_x: min_x,
            origin_y: max_y,
            scale,
            offset_x: pad_x + (usable_w - span_x * scale) / 2.0,
            offset_y: pad_y + (usable_h - span_y * scale) / 2.0,
        }
    }

    fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (x, y) = mercator(lon, lat);
        (
            self.offset_x + (x - self.origin_x) * self.scale,
            self.offset_y + (self.origin_y - y) * self.scale,
        )
    }

    fn rings(&self, mp: &MultiPolygon<f64>) -> Vec<Ring> {
        mp.0.iter()
            .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
            .map(|ring| ring.coords().map(|c| self.project(c.x, c.y)).collect())
            .collect()
    }
}

fn mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    (lon.to_radians(), (PI / 4.0 + lat / 2.0).tan().ln())
}

fn blend(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>, alpha: f64) {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return;
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let dst = img.get_pixel_mut(x as u32, y as u32);
    for i in 0..3 {
        let mixed = color.0[i] as f64 * alpha + dst.0[i] as f64 * (1.0 - alpha);
        dst.0[i] = mixed.round() as u8;
    }
    dst.0[3] = 255;
}

/// Scanline fill sampling pixel centers; overlapping rings cancel out.
fn fill_even_odd(img: &mut RgbaImage, rings: &[Ring], color: Rgba<u8>, alpha: f64) {
    let (min_y, max_y) = rings
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| (lo.min(y), hi.max(y)));
    if !min_y.is_finite() {
        return;
    }

    let first_row = min_y.floor().max(0.0) as i64;
    let last_row = max_y.ceil().min(img.height() as f64) as i64;
    let mut crossings = Vec::new();

    for row in first_row..last_row {
        let sample_y = row as f64 + 0.5;
        crossings.clear();

        for ring in rings {
            for edge in ring.windows(2) {
                let ((x0, y0), (x1, y1)) = (edge[0], edge[1]);
                if (y0 <= sample_y) != (y1 <= sample_y) {
                    crossings.push(x0 + (sample_y - y0) / (y1 - y0) * (x1 - x0));
                }
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            let start = (span[0] - 0.5).ceil().max(0.0) as i64;
            let end = (span[1] - 0.5).floor().min(img.width() as f64 - 1.0) as i64;
            for col in start..=end {
                blend(img, col, row, color, alpha);
            }
        }
    }
}

/// Strokes a closed ring with a square pen; dash runs continue across vertices.
fn stroke_ring(img: &mut RgbaImage, ring: &[(f64, f64)], color: Rgba<u8>, alpha: f64, weight: f64, dashes: &[f64]) {
    let half = (weight / 2.0).max(0.5);
    let cycle: f64 = dashes.iter().sum();
    let mut travelled = 0.0;

    for edge in ring.windows(2) {
        let ((x0, y0), (x1, y1)) = (edge[0], edge[1]);
        let length = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
        let steps = (length * 2.0).ceil().max(1.0) as usize;

        for step in 0..steps {
            let t = step as f64 / steps as f64;
            if cycle > 0.0 && !dash_is_on(dashes, (travelled + t * length) % cycle) {
                continue;
            }

            let (cx, cy) = (x0 + t * (x1 - x0), y0 + t * (y1 - y0));
            let (left, right) = ((cx - half).round() as i64, (cx + half).round() as i64);
            let (top, bottom) = ((cy - half).round() as i64, (cy + half).round() as i64);
            for y in top..bottom.max(top + 1) {
                for x in left..right.max(left + 1) {
                    blend(img, x, y, color, alpha);
                }
            }
        }
        travelled += length;
    }
}

fn dash_is_on(dashes: &[f64], mut position: f64) -> bool {
    for (i, run) in dashes.iter().enumerate() {
        if position < *run {
            return i % 2 == 0;
        }
        position -= run;
    }
    true
}

/// SVG-style dash array. Odd-length lists repeat to an even length; an
/// empty or invalid list means a solid line.
pub fn parse_dash_array(pattern: &str) -> Vec<f64> {
    let runs: Option<Vec<f64>> = pattern
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().ok().filter(|v| *v >= 0.0))
        .collect();

    match runs {
        Some(runs) if runs.iter().any(|r| *r > 0.0) => {
            if runs.len() % 2 == 1 {
                runs.iter().chain(runs.iter()).copied().collect()
            } else {
                runs
            }
        }
        _ => Vec::new(),
    }
}

pub fn parse_color(token: &str) -> Rgba<u8> {
    let token = token.trim().to_ascii_lowercase();
    if token.starts_with('#') {
        return hex_to_rgba(&token).unwrap_or(FALLBACK_COLOR);
    }

    match token.as_str() {
        "red" => Rgba([255, 0, 0, 255]),
        "blue" => Rgba([0, 0, 255, 255]),
        "white" => Rgba([255, 255, 255, 255]),
        "black" => Rgba([0, 0, 0, 255]),
        "gray" | "grey" => Rgba([128, 128, 128, 255]),
        "green" => Rgba([0, 128, 0, 255]),
        "orange" => Rgba([255, 165, 0, 255]),
        "yellow" => Rgba([255, 255, 0, 255]),
        "purple" => Rgba([128, 0, 128, 255]),
        _ => FALLBACK_COLOR,
    }
}

fn hex_to_rgba(hex: &str) -> Option<Rgba<u8>> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Rgba([r, g, b, 255]))
}
