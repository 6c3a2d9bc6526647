use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "prismctl")]
#[command(about = "Prism cluster allocator and UDF engine tools")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Shard allocator commands
    #[command(subcommand)]
    Cluster(ClusterCommands),

    /// UDF registration, metadata extraction, and invocation
    #[command(subcommand)]
    Udf(UdfCommands),
}

#[derive(Subcommand, Debug)]
enum ClusterCommands {
    /// Compute placement decisions for a new index
    Allocate {
        /// Path to a cluster state snapshot (JSON)
        #[arg(short, long)]
        state: PathBuf,

        /// Index name
        #[arg(short, long)]
        index: String,

        /// Number of shards
        #[arg(short, long)]
        shards: u32,

        /// Number of replicas per shard
        #[arg(short, long, default_value = "1")]
        replicas: u32,
    },

    /// Compute rebalance moves to reduce shard-count skew
    Rebalance {
        /// Path to a cluster state snapshot (JSON)
        #[arg(short, long)]
        state: PathBuf,
    },

    /// Print node health and shard-count skew for a snapshot
    Status {
        /// Path to a cluster state snapshot (JSON)
        #[arg(short, long)]
        state: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum UdfCommands {
    /// Extract UDF metadata from source text without compiling any WASM
    CompileMetadata {
        /// Path to the UDF source file
        #[arg(short, long)]
        source: PathBuf,
    },

    /// Register a WASM UDF and call it once against a document
    RegisterAndCall {
        /// Path to the compiled WASM binary
        #[arg(short, long)]
        wasm: PathBuf,

        /// Path to the UDF metadata (JSON)
        #[arg(short, long)]
        metadata: PathBuf,

        /// Path to the document fields (JSON object)
        #[arg(short, long)]
        document: PathBuf,

        /// Path to the call parameters (JSON object)
        #[arg(short, long)]
        params: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if std::env::var_os("PRISM_METRICS_DISABLED").is_none() {
        if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            tracing::warn!(error = %e, "failed to install prometheus metrics recorder");
        }
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Cluster(cmd) => match cmd {
            ClusterCommands::Allocate { state, index, shards, replicas } => {
                commands::run_allocate(&state, &index, shards, replicas)?;
            }
            ClusterCommands::Rebalance { state } => {
                commands::run_rebalance(&state)?;
            }
            ClusterCommands::Status { state } => {
                commands::run_status(&state)?;
            }
        },

        Commands::Udf(cmd) => match cmd {
            UdfCommands::CompileMetadata { source } => {
                commands::run_compile_metadata(&source)?;
            }
            UdfCommands::RegisterAndCall { wasm, metadata, document, params } => {
                commands::run_register_and_call(&wasm, &metadata, &document, params.as_deref())?;
            }
        },
    }

    Ok(())
}
