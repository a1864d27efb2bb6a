use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exhibit_cache::{
    FileImageSource, ImageLoader, ImageLoaderConfig, MemoryManager, MemoryManagerConfig,
    MemoryStats, ProcessHeapProbe,
};
use exhibit_core::{BatesConfig, BatesManager, ExportImportManager};
use exhibit_scheduler::{HttpFetcher, LazyLoader, LazyLoaderConfig, LoadOptions, LoadPriority};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "exhibit-cli")]
#[command(about = "Exhibit viewer command-line tools")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a run of Bates numbers.
    Bates {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value_t = 1)]
        start: u64,
        #[arg(long, default_value_t = 6)]
        pad: usize,
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        suffix: String,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Validate an annotation export and print a JSON summary.
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Decode images through the image cache and print their dimensions.
    Inspect {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
    /// Fetch URLs through the priority loader, one JSON line per URL.
    Fetch {
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,
        #[arg(long, default_value = "medium")]
        priority: LoadPriority,
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
    },
    /// Print process memory figures as JSON.
    Memory {
        /// Memory manager settings file (`key = value` lines)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InspectOutput {
    path: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Serialize)]
struct MemoryOutput {
    #[serde(flatten)]
    stats: MemoryStats,
    config: MemoryManagerConfig,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum FetchOutput {
    Loaded { url: String, bytes: usize },
    Failed { url: String, error: String },
}

/// Install the stderr log subscriber, `warn` unless `RUST_LOG` says otherwise
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    // A second call (tests driving `run` in-process) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Bates {
            prefix,
            start,
            pad,
            suffix,
            count,
        } => run_bates(BatesConfig::new(prefix, start, pad).with_suffix(suffix), count),
        Commands::Validate { file } => run_validate(&file),
        Commands::Inspect { files } => runtime()?.block_on(run_inspect(&files)),
        Commands::Fetch {
            urls,
            priority,
            concurrency,
        } => runtime()?.block_on(run_fetch(urls, priority, concurrency)),
        Commands::Memory { config } => run_memory(config.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn run_bates(config: BatesConfig, count: usize) -> Result<()> {
    let mut bates = BatesManager::new(config);
    for _ in 0..count {
        println!("{}", bates.generate_bates_number());
    }
    Ok(())
}

fn run_validate(file: &Path) -> Result<()> {
    let export = ExportImportManager::new()
        .import_file(file)
        .with_context(|| format!("invalid annotation export: {}", file.display()))?;

    println!("{}", serde_json::to_string_pretty(&export.summary())?);
    Ok(())
}

async fn run_inspect(files: &[PathBuf]) -> Result<()> {
    let config = ImageLoaderConfig::from_env()?.with_cache_size(files.len());
    let loader = ImageLoader::new(FileImageSource::new(), config);

    for file in files {
        let path = file.display().to_string();
        let image = loader
            .load_image(&path)
            .await
            .with_context(|| format!("failed to load image {path}"))?;
        let output = InspectOutput {
            path,
            width: image.width(),
            height: image.height(),
        };
        println!("{}", serde_json::to_string(&output)?);
    }

    tracing::debug!(stats = ?loader.stats(), "image cache");
    Ok(())
}

async fn run_fetch(urls: Vec<String>, priority: LoadPriority, concurrency: usize) -> Result<()> {
    let config = LazyLoaderConfig::from_env()?.with_max_concurrent_loads(concurrency);
    let loader = LazyLoader::new(HttpFetcher::new(), config);

    // Load each URL once; a repeated load would supersede the first caller
    let mut seen = HashSet::new();
    let unique: Vec<&str> = urls
        .iter()
        .map(String::as_str)
        .filter(|url| seen.insert(*url))
        .collect();

    let loads = unique.iter().map(|url| {
        let loader = &loader;
        async move {
            let result = loader.load(url, LoadOptions::with_priority(priority)).await;
            (*url, result)
        }
    });
    let results: HashMap<&str, _> = futures::future::join_all(loads)
        .await
        .into_iter()
        .collect();
    loader.destroy();

    let mut failed = 0;
    for url in &urls {
        let output = match results.get(url.as_str()) {
            Some(Ok(data)) => FetchOutput::Loaded {
                url: url.clone(),
                bytes: data.len(),
            },
            Some(Err(error)) => {
                failed += 1;
                FetchOutput::Failed {
                    url: url.clone(),
                    error: error.to_string(),
                }
            }
            None => continue,
        };
        println!("{}", serde_json::to_string(&output)?);
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} fetches failed", urls.len());
    }
    Ok(())
}

fn run_memory(config: Option<&Path>) -> Result<()> {
    let config = match config {
        Some(path) => MemoryManagerConfig::from_file(path)
            .with_context(|| format!("failed to read memory config {}", path.display()))?,
        None => MemoryManagerConfig::from_env()?,
    };
    let manager = MemoryManager::new(config.clone(), ProcessHeapProbe);
    let output = MemoryOutput {
        stats: manager.memory_stats(),
        config,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
