use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tile_preparer::progress::ProgressManager;
use tile_preparer::{
    BufferPool, PointCloudBinarySource, TileIndexBuilder, TileSource, TilingConfig,
};

#[derive(Parser)]
#[command(about = "Spatially tiles large binary point clouds for random access")]
struct ClArgs {
    #[command(subcommand)]
    command: Command,

    /// Verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbosity: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a raw binary file of f64 (x, y, z) triples into a
    /// quantized point source (.qpc)
    Convert {
        /// Input raw xyz file
        input: PathBuf,

        /// Output .qpc file path
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
    },

    /// Build a tile index (.pctx) from a quantized point source
    Index {
        /// Input .qpc file
        input: PathBuf,

        /// Output .pctx file path
        #[arg(short = 'o', long = "output")]
        output: PathBuf,

        /// Mean point count per finished tile
        #[arg(long, default_value_t = 40_000)]
        target_points_per_tile: u64,

        /// Cap on density-estimation grid cells
        #[arg(long, default_value_t = 160_000)]
        max_analysis_cells: usize,

        /// I/O and working buffer size, in MiB
        #[arg(long, default_value_t = 64)]
        buffer_size_mb: usize,
    },

    /// Print the header of a finished tile store
    Info {
        /// A .pctx file
        store: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let args = ClArgs::parse();

    let level = match args.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    match args.command {
        Command::Convert { input, output } => {
            let pool = BufferPool::new(tile_preparer::buffer::DEFAULT_BUFFER_SIZE, 1);
            let mut progress = console_progress();
            let source =
                tile_preparer::ingest::convert_raw_xyz(&input, &output, &pool, &mut progress)
                    .with_context(|| format!("converting {}", input.display()))?;
            println!(
                "wrote {} ({} points, extent {})",
                output.display(),
                source.count(),
                source.extent()
            );
        }
        Command::Index {
            input,
            output,
            target_points_per_tile,
            max_analysis_cells,
            buffer_size_mb,
        } => {
            let config = TilingConfig {
                target_points_per_tile,
                max_analysis_cells,
                buffer_size_bytes: buffer_size_mb * 1024 * 1024,
                ..TilingConfig::default()
            };
            let source = PointCloudBinarySource::open(&input)
                .with_context(|| format!("opening {}", input.display()))?;
            let pool = BufferPool::new(config.buffer_size_bytes, config.pool_buffers);
            let mut progress = console_progress();

            let store = TileIndexBuilder::new(&source, config)
                .build(&output, &pool, &mut progress)
                .with_context(|| format!("indexing {}", input.display()))?;

            if store.is_dirty() {
                anyhow::bail!("index build did not complete; {} is dirty", output.display());
            }
            println!(
                "wrote {} ({} tiles, {} points)",
                output.display(),
                store.rows() * store.cols(),
                store.count()
            );
        }
        Command::Info { store } => {
            let store = TileSource::read(&store)?;
            println!("extent:      {}", store.extent());
            println!("tiles:       {} x {}", store.rows(), store.cols());
            println!("points:      {}", store.count());
            println!("point size:  {} bytes", store.point_size_bytes());
            println!("dirty:       {}", store.is_dirty());
            let stats = store.statistics();
            println!(
                "z stats:     mean {:.3}, std dev {:.3}, mode {:.3}",
                stats.mean, stats.std_dev, stats.mode
            );
            let occupied = store.tile_counts().iter().filter(|&&n| n > 0).count();
            println!("occupied:    {occupied} tiles");
        }
    }
    Ok(())
}

/// Progress callback printing coarse percentage steps per process.
fn console_progress() -> ProgressManager {
    let mut last_reported = -1i32;
    ProgressManager::new(Box::new(move |name, fraction| {
        let pct = (fraction * 100.0) as i32;
        // A new process starts over at a lower fraction.
        if pct < last_reported {
            last_reported = -1;
        }
        if pct / 10 > last_reported / 10 {
            eprintln!("{name}: {pct}%");
            last_reported = pct;
        }
        true
    }))
}
