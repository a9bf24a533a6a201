mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tf_core::config::Config;
use tf_core::{JobId, Status};
use transforge::AppContext;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "transforge=trace,tf_pipeline=trace,tf_av=debug,tf_db=debug,tf_core=debug".to_string()
        } else {
            "transforge=info,tf_pipeline=info,tf_av=warn,tf_db=warn,tf_core=warn".to_string()
        }
    });

    // Logs go to stderr; stdout carries JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Submit {
            input,
            profiles,
            duration,
            quiet,
        } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(submit(config, &input, &profiles, duration, quiet))
        }
        Commands::Status { job_id } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(status(config, &job_id))
        }
        Commands::List { limit } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(list(config, limit))
        }
        Commands::Profiles => {
            let config = Config::load_or_default(cli.config.as_deref());
            list_profiles(&config);
            Ok(())
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_tools(config))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("transforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn submit(
    config: Config,
    input: &Path,
    profiles: &[String],
    duration: Option<f64>,
    quiet: bool,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let ctx = AppContext::open(config)?;
    ctx.recover().await?;
    let orchestrator = &ctx.orchestrator;

    let (job, mut sub) = orchestrator
        .submit_subscribed(&input.to_string_lossy(), profiles, duration)
        .await?;
    tracing::info!("Submitted job {}", job.id);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = sub.recv() => {
                let Some(event) = event else { break };
                if !quiet {
                    println!("{}", serde_json::to_string(&event)?);
                }
                if event.payload.is_job_terminal() {
                    break;
                }
            }
            res = &mut ctrl_c, if !interrupted => {
                res?;
                interrupted = true;
                tracing::warn!("Interrupt received, cancelling job {}", job.id);
                orchestrator.cancel(job.id).await?;
            }
        }
    }

    let state = orchestrator.job(job.id).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);

    if state.job.status == Status::Error {
        anyhow::bail!(
            "Job {} failed: {}",
            job.id,
            state.job.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn status(config: Config, job_id: &str) -> Result<()> {
    let id: JobId = job_id
        .parse()
        .with_context(|| format!("Invalid job id: {job_id}"))?;

    let ctx = AppContext::open(config)?;
    let state = ctx.orchestrator.job(id).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn list(config: Config, limit: usize) -> Result<()> {
    let ctx = AppContext::open(config)?;
    let jobs = ctx.orchestrator.list(limit).await?;

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    for job in &jobs {
        print!(
            "{}  {:<10}  {}  [{}]",
            job.id,
            job.status.as_str(),
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.requested_profiles.join(", ")
        );
        println!("  {}", job.input_ref);
        if let Some(ref err) = job.error_message {
            println!("    error: {err}");
        }
    }

    Ok(())
}

fn list_profiles(config: &Config) {
    let table = config.profile_table();
    for profile in table.iter() {
        println!(
            "{:<8} {:>5}p  {}",
            profile.name, profile.height, profile.bitrate
        );
    }
}

async fn check_tools(config: Config) -> Result<()> {
    println!("Checking external tools...\n");

    let registry = tf_av::ToolRegistry::discover(&config.tools);
    let tools = registry.check_all().await;
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
        println!("Some tools are missing. Install them to enable transcoding.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration has {} warning(s):", warnings.len());
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    println!("  Database: {}", config.storage.db_path.display());
    println!("  Output dir: {}", config.storage.output_dir.display());
    println!(
        "  Max concurrent variants: {}",
        config.pipeline.max_concurrent_variants
    );
    println!("  Profiles: {}", config.profile_table().names().join(", "));

    Ok(())
}
