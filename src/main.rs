mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};

use rd_core::events::EventBus;
use rd_core::{JobStatus, Requester, UserId};
use rd_encode::{FfmpegRunner, ToolRegistry};
use rd_store::{init_pool, JobFilter, JobRepository, JobStore, SqliteJobRepository};
use renditiond::config::{self, Config};
use renditiond::{AssetCatalog, Orchestrator, OrchestratorSettings};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "renditiond=trace,rd_encode=trace,rd_store=debug,rd_core=debug".to_string()
        } else {
            "renditiond=info,rd_encode=info,rd_store=info,rd_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Transcode {
            input,
            profiles,
            output_dir,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(transcode(
                &input,
                &profiles,
                output_dir,
                cli.config.as_deref(),
            ))
        }
        Commands::Profiles { json } => list_profiles(cli.config.as_deref(), json),
        Commands::Jobs { status } => list_jobs(cli.config.as_deref(), status.as_deref()),
        Commands::Recover => recover(cli.config.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("renditiond {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Build the job store, writing through to the database when one is
/// configured.
///
/// Jobs already in the database are not loaded: other processes may still
/// be working on them.
fn open_store(config: &Config) -> Result<JobStore> {
    match config.store.database_path {
        Some(_) => Ok(JobStore::with_repository(open_repository(config)?)),
        None => Ok(JobStore::in_memory()),
    }
}

fn open_repository(config: &Config) -> Result<Arc<SqliteJobRepository>> {
    let Some(ref db_path) = config.store.database_path else {
        anyhow::bail!("No database configured; set store.database_path to keep job history");
    };

    tracing::info!("Opening job database at {:?}", db_path);
    let pool = init_pool(db_path)
        .with_context(|| format!("Failed to open job database: {:?}", db_path))?;
    Ok(Arc::new(SqliteJobRepository::new(pool)))
}

async fn transcode(
    input: &Path,
    profile_names: &[String],
    output_dir: Option<std::path::PathBuf>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(dir) = output_dir {
        config.orchestrator.output_dir = dir;
    }

    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let profiles = if profile_names.is_empty() {
        config.profiles.clone()
    } else {
        config.profiles.select(profile_names)?
    };

    let tools = ToolRegistry::discover(&config.tools);
    let runner = Arc::new(FfmpegRunner::from_registry(&tools)?);
    let store = Arc::new(open_store(&config)?);
    let assets = Arc::new(AssetCatalog::new());
    let bus = Arc::new(EventBus::new(config.orchestrator.event_capacity));

    let orchestrator = Orchestrator::new(
        OrchestratorSettings::from(&config.orchestrator),
        store,
        assets.clone(),
        runner,
        bus,
    );

    // The command line acts as the asset owner.
    let owner = UserId::new();
    let requester = Requester::user(owner);
    let asset = assets.register(owner, input)?;
    let job_id = orchestrator.start_job(asset.id, profiles.as_slice().to_vec())?;
    tracing::info!("Started job {} ({} profiles)", job_id, profiles.len());

    let job = tokio::select! {
        job = orchestrator.wait_for_job(job_id) => job?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; cancelling job {}", job_id);
            orchestrator.cancel_job(job_id, &requester)?;
            orchestrator.wait_for_job(job_id).await?
        }
    };
    orchestrator.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&job)?);

    match job.status {
        JobStatus::Completed => Ok(()),
        JobStatus::CompletedWithErrors => {
            anyhow::bail!("Job finished with errors: {}", job.failed_tasks().join(", "))
        }
        status => anyhow::bail!("Job {}", status),
    }
}

fn list_profiles(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config.profiles)?);
        return Ok(());
    }

    for profile in config.profiles.iter() {
        let quality = match (&profile.video_bitrate, profile.crf) {
            (Some(bitrate), _) => format!("{} video", bitrate),
            (None, Some(crf)) => format!("crf {}", crf),
            (None, None) => format!("crf {} (adaptive)", rd_encode::adaptive_crf(profile.height)),
        };
        println!(
            "{:<10} {:>9}  {} {}, {}, audio {} -> .{}",
            profile.name,
            profile.size(),
            profile.video_codec,
            profile.preset,
            quality,
            profile.audio_bitrate,
            profile.container
        );
    }

    Ok(())
}

fn list_jobs(config_path: Option<&Path>, status: Option<&str>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let filter = JobFilter {
        status: status.map(str::parse::<JobStatus>).transpose()?,
        ..JobFilter::default()
    };
    let store = JobStore::with_repository(open_repository(&config)?);
    store.load_snapshot().context("Failed to read jobs")?;
    let jobs = store.list_jobs(&filter);

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    for job in &jobs {
        println!(
            "{}  {:<22} {}  ({}/{} succeeded)",
            job.id,
            job.status,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.counts.succeeded,
            job.counts.total()
        );
        for task in &job.tasks {
            match (&task.output_path, &task.error) {
                (Some(path), _) => println!("    {:<10} {}", task.name(), path.display()),
                (None, Some(error)) => println!("    {:<10} error: {}", task.name(), error),
                (None, None) => println!("    {:<10} {:?}", task.name(), task.status),
            }
        }
    }

    Ok(())
}

fn recover(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let repo = open_repository(&config)?;
    let jobs = repo.load_all().context("Failed to read jobs")?;
    let count = jobs.len();

    let store = JobStore::with_repository(repo);
    let interrupted = store.restore(jobs).context("Failed to restore jobs")?;

    println!("Checked {} jobs; {} tasks marked as interrupted.", count, interrupted);
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. ffmpeg is required; ffprobe enables progress reporting.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let orch = &config.orchestrator;
    println!("  Max concurrent encodes: {}", orch.max_concurrent_encodes);
    match orch.task_timeout_secs {
        Some(secs) => println!("  Task timeout: {}s", secs),
        None => println!("  Task timeout: none"),
    }
    println!("  Output dir: {}", orch.output_dir.display());
    println!(
        "  Profiles: {}",
        config
            .profiles
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    for warning in config.warnings() {
        println!("  warning: {}", warning);
    }

    Ok(())
}
