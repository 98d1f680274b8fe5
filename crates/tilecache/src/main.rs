//! tilecache - Offline map tile cache

mod cli;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tilecache_core::{
    CacheConfig, MapLibrary, SaveRequest, StoreState, Tile, TileCoord, TileSource,
};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "tilecache",
    version,
    about = "Offline map tile cache",
    long_about = "Stores map tiles in a local SQLite database so saved maps work offline.\n\
                  \n\
                  Examples:\n\
                    tilecache init                                     # Create the database\n\
                    tilecache put name-name 8 316 661 --file tile.png  # Cache one tile\n\
                    tilecache resolve name-name 8 316 661 --fallback URL\n\
                    tilecache plan edinburgh --min-zoom 8 --max-zoom 9 --extent L,B,R,T\n\
                    tilecache maps                                     # List saved maps\n\
                    tilecache delete name-name                         # Remove a map\n\
                  \n\
                  Environment Variables:\n\
                    TILECACHE_DATA_DIR               # Override the data directory\n\
                    TILECACHE_CONFIG                 # Path to a TOML config file\n\
                    RUST_LOG                         # Log filter (e.g. tilecache_core=debug)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the tile database and saved maps
    #[arg(long, env = "TILECACHE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// TOML configuration file (default: <data-dir>/config.toml)
    #[arg(long, env = "TILECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Disable ANSI colors in tables
    #[arg(long, env = "TILECACHE_NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create the tile database and print where it lives
    Init,
    /// Store one tile payload
    Put {
        map: String,
        zoom: u32,
        column: u32,
        row: u32,
        /// Payload given inline (e.g. a data: URI)
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        data: Option<String>,
        /// Read the payload from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print the cached payload, or the fallback URL on a miss
    Resolve {
        map: String,
        zoom: u32,
        column: u32,
        row: u32,
        /// Remote URL returned when the tile is not cached
        #[arg(long)]
        fallback: String,
    },
    /// Delete a map's tiles and its saved-map record
    Delete { map: String },
    /// Rename a saved map and its tiles
    Rename { old: String, new: String },
    /// List saved maps
    Maps {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show tile database statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Work out which tiles saving a map would download
    Plan {
        map: String,
        #[arg(long)]
        min_zoom: u32,
        #[arg(long)]
        max_zoom: u32,
        /// left,bottom,right,top in grid units
        #[arg(long, allow_hyphen_values = true)]
        extent: String,
        /// Tile service root
        #[arg(long, default_value = "https://tiles.example.org/tms/1.0.0/open")]
        base_url: String,
        /// Tile file extension
        #[arg(long, default_value = "png")]
        ext: String,
        /// Record the map as saved (tiles are then added with `put`)
        #[arg(long)]
        record: bool,
    },
    /// Remove every cached tile
    Clear,
    /// Compact the tile database
    Vacuum,
}

/// Initialize the tracing subscriber, logging to stderr
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "tilecache=debug,tilecache_core=debug"
    } else {
        "tilecache=info,tilecache_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = cli
        .data_dir
        .or_else(|| dirs::data_dir().map(|d: PathBuf| d.join("tilecache")))
        .context("Could not determine data directory")?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let config_path = cli
        .config
        .unwrap_or_else(|| data_dir.join("config.toml"));
    let config = CacheConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    debug!(data_dir = %data_dir.display(), config = %config_path.display(), "Starting");

    let library = MapLibrary::open(&data_dir, &config).await;
    let no_color = cli.no_color;

    match cli.command {
        Command::Init => run_init(&library, &config, &data_dir),
        Command::Put {
            map,
            zoom,
            column,
            row,
            data,
            file,
        } => run_put(&library, map, TileCoord::new(zoom, column, row), data, file).await,
        Command::Resolve {
            map,
            zoom,
            column,
            row,
            fallback,
        } => {
            let source = library
                .resolve_tile(&map, TileCoord::new(zoom, column, row), &fallback)
                .await;
            if let TileSource::Remote(_) = &source {
                eprintln!("miss");
            }
            println!("{}", source.into_string());
            Ok(())
        }
        Command::Delete { map } => {
            let deletion = library
                .delete_map(&map)
                .await
                .with_context(|| format!("Failed to delete map '{}'", map))?;
            println!(
                "Deleted '{}': {} tiles removed{}",
                deletion.map_name,
                deletion.tiles_removed,
                if deletion.record_removed {
                    ""
                } else {
                    " (no saved-map record)"
                }
            );
            Ok(())
        }
        Command::Rename { old, new } => {
            if !library.rename_map(&old, &new).await? {
                bail!("Nothing renamed: '{}' is not saved or the new name is invalid", old);
            }
            println!("Renamed '{}' to '{}'", old, tilecache_core::sanitize_map_name(new.trim()));
            Ok(())
        }
        Command::Maps { json } => {
            let maps = library.saved_maps().await?;
            println!("{}", cli::format_maps_table(&maps, json, no_color));

            let orphans = library.orphaned_maps().await?;
            if !json && !orphans.is_empty() {
                eprintln!("\nTiles without a saved map: {}", orphans.join(", "));
            }
            Ok(())
        }
        Command::Stats { json } => {
            let store = library
                .cache()
                .store()
                .context("Tile database unavailable")?;
            let stats = store.stats().await?;
            let summaries = store.map_summaries().await?;
            println!("{}", cli::format_stats(&stats, &summaries, json, no_color));
            Ok(())
        }
        Command::Plan {
            map,
            min_zoom,
            max_zoom,
            extent,
            base_url,
            ext,
            record,
        } => {
            let request = SaveRequest {
                map_name: map,
                extent: cli::parse_extent(&extent)?,
                min_zoom,
                max_zoom,
                base_url,
                file_type: ext,
            };
            let plan = library.plan_save(&request)?;
            println!("{}", cli::format_plan(&plan));

            if record {
                library.complete_save(&plan, None)?;
                println!("Recorded '{}' as saved", plan.map_name);
            }
            Ok(())
        }
        Command::Clear => {
            let removed = library.cache().clear().await?;
            println!("Cleared {} tiles", removed);
            Ok(())
        }
        Command::Vacuum => {
            library
                .cache()
                .store()
                .context("Tile database unavailable")?
                .vacuum()
                .await?;
            println!("Database compacted");
            Ok(())
        }
    }
}

fn run_init(library: &MapLibrary, config: &CacheConfig, data_dir: &std::path::Path) -> Result<()> {
    let state = library
        .cache()
        .store()
        .map(|s| s.state())
        .unwrap_or(StoreState::Unopened);
    if state != StoreState::Ready {
        let reason = match library.cache().degraded_state() {
            tilecache_core::DegradedState::Passthrough { reason } => reason,
            tilecache_core::DegradedState::Healthy => state.to_string(),
        };
        bail!("Tile database could not be initialized: {}", reason);
    }

    println!("Tile database: {}", config.database_path(data_dir).display());
    println!("Saved maps:    {}", config.saved_maps_path(data_dir).display());
    println!("Saved map count: {}", library.saved_map_count());
    Ok(())
}

async fn run_put(
    library: &MapLibrary,
    map: String,
    coord: TileCoord,
    data: Option<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let payload = match (data, file) {
        (Some(data), _) => data,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read payload from {}", path.display()))?,
        (None, None) => bail!("Either --data or --file is required"),
    };

    match library.store_tile(Tile::new(coord, &map, payload)).await {
        Ok(()) => {
            println!("Stored {} in '{}'", coord, map);
            Ok(())
        }
        Err(e) if e.is_storage_full() => {
            bail!("Tile database is full; delete a saved map to free space")
        }
        Err(e) => Err(e).with_context(|| format!("Failed to store tile {}", coord)),
    }
}
