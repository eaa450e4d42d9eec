//! CLI entry point for the outpost-recon pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use outpost_store::FsRunStore;

use outpost_recon::config::ReconConfig;
use outpost_recon::pipeline::{OutcomeStatus, Pipeline, RunConfig};
use outpost_recon::scope::Scope;
use outpost_recon::stage::RunObserver;
use outpost_recon::stages::default_registry;

#[derive(Parser)]
#[command(name = "outpost-recon")]
#[command(about = "Resumable attack-surface recon pipeline")]
struct Cli {
    /// Target apex domain to scan.
    #[arg(short, long)]
    target: Option<String>,

    /// Run only these stages (comma-separated; registry order applies).
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Skip these stages (comma-separated, applied after --only).
    #[arg(long, value_delimiter = ',')]
    skip: Vec<String>,

    /// Skip stages a prior run of this target already completed.
    #[arg(long)]
    resume: bool,

    /// Reuse an existing working directory instead of deriving a new one.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Run-wide deadline in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Config file prefix (default: outpost).
    #[arg(short, long, default_value = "outpost")]
    config: String,

    /// Print the registered stages in execution order and exit.
    #[arg(long)]
    list_stages: bool,

    /// Print prior runs for the target, newest first, and exit.
    #[arg(long)]
    history: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let recon_config = load_recon_config(&cli.config)?;

    let store = Arc::new(FsRunStore::new(&recon_config.store_dir)?);
    let registry = default_registry(&recon_config, store.clone());

    if cli.list_stages {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let target = cli
        .target
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--target is required"))?;

    if cli.history {
        return print_history(store.as_ref(), target);
    }

    let scope = Arc::new(Scope::for_target(&recon_config, target)?);
    let run_config = RunConfig {
        target: target.to_string(),
        workdir: cli.workdir.clone(),
        output_root: PathBuf::from(&recon_config.output_root),
        only: cli.only.clone(),
        skip: cli.skip.clone(),
        resume: cli.resume,
        timeout: cli.timeout.map(Duration::from_secs),
        scope,
    };

    let pipeline =
        Pipeline::new(registry, store).with_observer(Arc::new(ProgressObserver));
    let outcome = pipeline.run(&run_config).await?;

    println!(
        "Run {} {}: {}/{} stages succeeded, results in {}",
        outcome.run_id,
        outcome.status,
        outcome.attempted.len() - outcome.failures.len(),
        outcome.attempted.len(),
        outcome.workdir.display(),
    );
    if outcome.status == OutcomeStatus::Partial {
        for (stage, error) in &outcome.failures {
            eprintln!("  {stage}: {error}");
        }
        eprintln!("Re-run with --resume to retry the failed stages.");
        std::process::exit(1);
    }

    Ok(())
}

/// Logs stage progress as `[i/total]` markers.
struct ProgressObserver;

impl RunObserver for ProgressObserver {
    fn stage_started(&self, name: &str, index: usize, total: usize) {
        tracing::info!(stage = name, progress = %format!("[{}/{total}]", index + 1), "Stage starting");
    }

    fn stage_finished(
        &self,
        name: &str,
        index: usize,
        total: usize,
        error: Option<&str>,
        elapsed: Duration,
    ) {
        match error {
            Some(error) => tracing::warn!(
                stage = name,
                progress = %format!("[{}/{total}]", index + 1),
                error,
                duration_ms = elapsed.as_millis() as u64,
                "Stage failed"
            ),
            None => tracing::info!(
                stage = name,
                progress = %format!("[{}/{total}]", index + 1),
                duration_ms = elapsed.as_millis() as u64,
                "Stage finished"
            ),
        }
    }
}

fn print_history(store: &FsRunStore, target: &str) -> anyhow::Result<()> {
    use outpost_store::RunStore;

    let runs = store.list_by_target(target)?;
    if runs.is_empty() {
        println!("No recorded runs for {target}");
        return Ok(());
    }
    for run in runs {
        println!(
            "{}  {}  {}  stages=[{}]  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.id,
            run.status,
            run.stages_run.join(","),
            run.workdir.display(),
        );
    }
    Ok(())
}

fn load_recon_config(file_prefix: &str) -> anyhow::Result<ReconConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("OUTPOST_RECON")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<ReconConfig>("recon") {
        Ok(c) => Ok(c),
        Err(_) => Ok(ReconConfig::default()),
    }
}
