mod generate;
mod inspect;
mod simulate;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use groundcover_common::EntityId;
use groundcover_kernel::Dataset;
use groundcover_persist::{CborCodec, Codec, FileSaveStore, MemorySaveStore};
use groundcover_session::{GroundcoverConfig, LossPolicy};
use groundcover_stream::SpatialIndex;
use groundcover_transfer::PayloadKind;
use tracing_subscriber::EnvFilter;

use crate::inspect::DatasetInspector;
use crate::simulate::SimulationParams;

#[derive(Parser)]
#[command(name = "groundcover-cli", about = "CLI tool for groundcover worlds")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Payload {
    Full,
    Diff,
}

impl From<Payload> for PayloadKind {
    fn from(p: Payload) -> Self {
        match p {
            Payload::Full => PayloadKind::Full,
            Payload::Diff => PayloadKind::Diff,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Scatter a deterministic template dataset over the grid
    Generate {
        #[arg(short, long)]
        out: PathBuf,
        #[arg(short = 'n', long, default_value = "1000")]
        count: u32,
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Build the spatial index for a template and write it next to it
    BuildIndex {
        template: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Check a template, and optionally a prebuilt index against it
    Validate {
        template: PathBuf,
        #[arg(short, long)]
        index: Option<PathBuf>,
    },
    /// Summarize a template or one of its entities
    Inspect {
        template: PathBuf,
        #[arg(short, long)]
        entity: Option<u32>,
        /// Also list the densest cells
        #[arg(long, default_value = "0")]
        cells: usize,
    },
    /// Run a host and a client over the loopback network
    Simulate {
        template: PathBuf,
        /// Save directory for the host; in-memory when omitted
        #[arg(long)]
        saves: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "diff")]
        payload: Payload,
        /// Drop every n-th datagram during the transfer
        #[arg(long)]
        drop_every: Option<u64>,
        #[arg(long, default_value = "100")]
        steps: u32,
        #[arg(long, default_value = "5")]
        damage_every: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => GroundcoverConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GroundcoverConfig::default(),
    };
    let codec = CborCodec::default();

    match cli.command {
        Commands::Generate { out, count, seed } => {
            let dataset = generate::template(&config.grid, count, seed, config.dataset_version);
            std::fs::write(&out, codec.encode(&dataset)?)
                .with_context(|| format!("writing {}", out.display()))?;
            println!(
                "Generated {} entities (seed={seed}, version={}) -> {}",
                dataset.len(),
                dataset.version,
                out.display()
            );
        }
        Commands::BuildIndex { template, out } => {
            let dataset = read_template(&codec, &template)?;
            let index = SpatialIndex::build(config.grid, &dataset.records)?;
            std::fs::write(&out, codec.encode(&index)?)
                .with_context(|| format!("writing {}", out.display()))?;
            println!(
                "Index: {} cells, {} placements -> {}",
                index.len(),
                index.total_placements(),
                out.display()
            );
        }
        Commands::Validate { template, index } => {
            let dataset = read_template(&codec, &template)?;
            let missing: Vec<&str> = dataset
                .records
                .iter()
                .map(|r| r.type_name.as_str())
                .filter(|name| generate::catalog().get(name).is_none())
                .collect();
            if !missing.is_empty() {
                tracing::warn!(count = missing.len(), "records of uncatalogued types will not stream");
            }
            let index = match index {
                Some(path) => {
                    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                    let index: SpatialIndex = codec.decode(&bytes)?;
                    index.validate(&dataset.records)?;
                    index
                }
                None => SpatialIndex::build(config.grid, &dataset.records)?,
            };
            println!(
                "OK: {} records, {} cells",
                dataset.len(),
                index.len()
            );
        }
        Commands::Inspect { template, entity, cells } => {
            let dataset = read_template(&codec, &template)?;
            match entity {
                Some(id) => match DatasetInspector::inspect_entity(&dataset, EntityId(id)) {
                    Some(info) => println!("{info}"),
                    None => anyhow::bail!("no entity {}", EntityId(id)),
                },
                None => println!("{}", DatasetInspector::summary(&dataset, &generate::catalog())),
            }
            if cells > 0 {
                let index = SpatialIndex::build(config.grid, &dataset.records)?;
                for (x, z, members) in DatasetInspector::densest_cells(&index, cells) {
                    println!("  cell ({x}, {z}): {members}");
                }
            }
        }
        Commands::Simulate {
            template,
            saves,
            payload,
            drop_every,
            steps,
            damage_every,
        } => {
            let dataset = read_template(&codec, &template)?;
            let params = SimulationParams {
                kind: payload.into(),
                loss: drop_every.map_or(LossPolicy::None, LossPolicy::DropEveryNth),
                walk_steps: steps,
                damage_every,
                max_ticks: config.transfer.timeout_ticks + 1,
            };
            let catalog = generate::catalog();
            let report = match saves {
                Some(dir) => simulate::run(&config, &dataset, &catalog, FileSaveStore::open(&dir)?, &params)?,
                None => simulate::run(&config, &dataset, &catalog, MemorySaveStore::new(), &params)?,
            };
            println!("{report}");
            if !report.in_sync() {
                anyhow::bail!("host and client diverged");
            }
        }
    }

    Ok(())
}

fn read_template(codec: &CborCodec, path: &Path) -> anyhow::Result<Dataset> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    codec
        .decode_dataset(&bytes)
        .with_context(|| format!("decoding {}", path.display()))
}
