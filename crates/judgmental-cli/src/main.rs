use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use judgmental_convert::{convert_all, ConvertConfig, FileLog, LogSink};
use tracing::info;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(name = "judgmental")]
#[command(about = "Convert scraped judgment pages into finished site pages")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Convert(ConvertArgs),
}

#[derive(Debug, Default, Args)]
struct ConvertArgs {
    /// Convert one file at a time on the calling task.
    #[arg(long)]
    slow: bool,
    /// Convert only these files instead of walking the input directory.
    #[arg(long, num_args = 1..)]
    files: Vec<PathBuf>,
    #[arg(long)]
    input_dir: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long)]
    template: Option<PathBuf>,
    #[arg(long)]
    workers: Option<usize>,
    /// Print the run summary as JSON.
    #[arg(long)]
    json: bool,
}

impl ConvertArgs {
    fn apply(self, mut config: ConvertConfig) -> (ConvertConfig, Vec<PathBuf>, bool) {
        if self.slow {
            config.parallel = false;
        }
        if let Some(dir) = self.input_dir {
            config.input_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(db) = self.db {
            config.database = db;
        }
        if let Some(log_file) = self.log_file {
            config.log_file = log_file;
        }
        if let Some(template) = self.template {
            config.template = template;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        (config, self.files, self.json)
    }
}

fn html_files_under(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        let is_html = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("html"));
        if entry.file_type().is_file() && is_html {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

async fn convert(args: ConvertArgs) -> Result<()> {
    let (config, files, json) = args.apply(ConvertConfig::from_env());
    let files = if files.is_empty() {
        html_files_under(&config.input_dir)?
    } else {
        files
    };

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    let log = Arc::new(
        FileLog::create(&config.log_file)
            .with_context(|| format!("creating {}", config.log_file.display()))?,
    );
    log.append(&format!("File list contains {} files", files.len()))
        .context("writing conversion log")?;
    info!(files = files.len(), input = %config.input_dir.display(), "file list ready");

    let mut pool = config.pool();
    let summary = convert_all(&files, &config.settings(), log, pool.as_mut()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "convert complete: run_id={} submitted={} succeeded={} failed={} faulted={}",
            summary.run_id, summary.submitted, summary.succeeded, summary.failed, summary.faulted
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli
        .command
        .unwrap_or_else(|| Commands::Convert(ConvertArgs::default()))
    {
        Commands::Convert(args) => convert(args).await?,
    }

    Ok(())
}
