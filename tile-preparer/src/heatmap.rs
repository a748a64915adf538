//! Renders the per-tile point counts of a tile store as a PNG heatmap.
//! Diagnostic output for eyeballing a build's density distribution.

use clap::Parser;
use plotters::prelude::*;
use std::path::PathBuf;

use tile_preparer::TileSource;

/// Available colormaps, each defined by evenly spaced control points
/// interpolated linearly in RGB.
#[derive(Debug, Clone, Copy)]
enum Colormap {
    /// Blue -> Cyan -> Green -> Yellow -> Red
    Jet,
    /// Perceptually uniform, colorblind-friendly
    Viridis,
    /// Improved rainbow, more uniform than jet
    Turbo,
}

impl Colormap {
    fn control_points(&self) -> &'static [(f64, f64, f64)] {
        match self {
            Colormap::Jet => &[
                (0.0, 0.0, 0.5),
                (0.0, 0.0, 1.0),
                (0.0, 1.0, 1.0),
                (0.0, 1.0, 0.0),
                (1.0, 1.0, 0.0),
                (1.0, 0.0, 0.0),
            ],
            Colormap::Viridis => &[
                (0.267004, 0.004874, 0.329415),
                (0.282623, 0.140926, 0.457517),
                (0.163625, 0.471133, 0.558148),
                (0.477504, 0.821444, 0.318195),
                (0.993248, 0.906157, 0.143936),
            ],
            Colormap::Turbo => &[
                (0.18995, 0.07176, 0.23217),
                (0.11770, 0.56700, 0.75088),
                (0.17205, 0.88797, 0.54362),
                (0.89567, 0.99343, 0.29685),
                (0.97809, 0.55414, 0.10540),
                (0.78801, 0.08080, 0.06051),
            ],
        }
    }

    /// Map a normalized value [0.0, 1.0] to an RGB color.
    fn map(&self, value: f64) -> (u8, u8, u8) {
        let points = self.control_points();
        let v = value.clamp(0.0, 1.0);
        let idx = v * (points.len() - 1) as f64;
        let i = idx.floor() as usize;
        if i >= points.len() - 1 {
            return to_rgb8(points[points.len() - 1]);
        }
        let t = idx - i as f64;
        let (r0, g0, b0) = points[i];
        let (r1, g1, b1) = points[i + 1];
        to_rgb8((r0 + t * (r1 - r0), g0 + t * (g1 - g0), b0 + t * (b1 - b0)))
    }
}

fn to_rgb8((r, g, b): (f64, f64, f64)) -> (u8, u8, u8) {
    ((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}

#[derive(clap::Parser)]
#[command(about = "Renders a tile store's density grid as a PNG heatmap")]
struct ClArgs {
    /// Input tile store (.pctx)
    #[arg()]
    store: PathBuf,

    /// Output PNG file path
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Color scheme to use (jet, viridis, turbo)
    #[arg(long, default_value = "jet")]
    colormap: String,

    /// Pixels per tile
    #[arg(long, default_value_t = 4)]
    scale: u32,
}

fn main() -> anyhow::Result<()> {
    let args = ClArgs::parse();

    let store = TileSource::read(&args.store)?;
    println!(
        "loaded {}: {}x{} tiles, {} points",
        args.store.display(),
        store.rows(),
        store.cols(),
        store.count()
    );
    if store.is_dirty() {
        eprintln!("warning: store is dirty, counts may be incomplete");
    }

    let colormap = match args.colormap.to_lowercase().as_str() {
        "jet" => Colormap::Jet,
        "viridis" => Colormap::Viridis,
        "turbo" => Colormap::Turbo,
        other => {
            eprintln!("Unknown colormap '{other}', using 'jet'");
            Colormap::Jet
        }
    };

    render_heatmap(&store, &args.output, colormap, args.scale.max(1))?;
    println!("heatmap saved to: {}", args.output.display());
    Ok(())
}

/// Paints each tile as a `scale`-pixel square. Counts are normalized on
/// a logarithmic scale, ln(1 + count) / ln(1 + max), so a handful of
/// dense tiles does not wash out the rest of the map. Tile row 0 is the
/// minimum-Y edge, so it lands at the bottom of the image.
fn render_heatmap(
    store: &TileSource,
    output: &std::path::Path,
    colormap: Colormap,
    scale: u32,
) -> anyhow::Result<()> {
    let max_count = store.tile_counts().iter().copied().max().unwrap_or(0).max(1);
    let denom = (max_count as f64).ln_1p();

    let width = store.cols() as u32 * scale;
    let height = store.rows() as u32 * scale;
    let root = BitMapBackend::new(output, (width, height)).into_drawing_area();
    root.fill(&BLACK)?;

    for row in 0..store.rows() {
        for col in 0..store.cols() {
            let count = store.tile_count(row, col);
            if count == 0 {
                continue;
            }
            let intensity = ((count as f64).ln_1p() / denom).clamp(0.0, 1.0);
            let (r, g, b) = colormap.map(intensity);
            let color = RGBColor(r, g, b);

            let x0 = col as i32 * scale as i32;
            let y0 = (store.rows() - 1 - row) as i32 * scale as i32;
            for dy in 0..scale as i32 {
                for dx in 0..scale as i32 {
                    root.draw_pixel((x0 + dx, y0 + dy), &color)?;
                }
            }
        }
    }

    root.present()?;
    Ok(())
}
