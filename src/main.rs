mod cli;

use mp3ify::{
    config::{self, Config},
    conversion::{EngineSettings, JobEngine, ProcessRunner, ProcessSettings},
    events::EventHub,
    render::{ProgressRenderer, RenderChange},
    server,
    store::JobStore,
};
use mp3ify_common::JobState;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn build_engine(config: &Config, store: JobStore) -> Result<JobEngine> {
    let hub = Arc::new(EventHub::new(config.engine.subscriber_buffer));
    let runner = Arc::new(ProcessRunner::new(ProcessSettings::from_config(config)));
    let engine = JobEngine::start(store, hub, runner, EngineSettings::from_config(config))
        .context("Failed to start job engine")?;
    Ok(engine)
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting mp3ify server");
    tracing::info!("Using converter {:?}", config.converter.program);

    let db_path = config.storage.db_path();
    tracing::info!("Initializing database at {}", db_path.display());
    let store = JobStore::open(&db_path)
        .with_context(|| format!("Failed to open job database {:?}", db_path))?;

    let engine = build_engine(&config, store)?;
    server::start_server(config, engine).await
}

async fn convert(source: &str, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    // A private store, so recovery never touches a running server's jobs
    let store = JobStore::in_memory()?;
    let engine = build_engine(&config, store)?;

    let id = engine.create_job(source)?;
    let mut subscription = engine.subscribe(id)?;
    let mut renderer = ProgressRenderer::new();
    let mut stdout = std::io::stdout();
    let mut printed_any = false;

    let interrupted = loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break false };
                match renderer.apply(&event) {
                    RenderChange::Appended => {
                        if printed_any {
                            writeln!(stdout)?;
                        }
                        write!(stdout, "{}", renderer.last_line().unwrap_or_default())?;
                        printed_any = true;
                    }
                    RenderChange::Replaced => {
                        write!(stdout, "\r\x1b[2K{}", renderer.last_line().unwrap_or_default())?;
                    }
                    RenderChange::Status(state) => tracing::info!("Job {} is {}", id, state),
                    RenderChange::None => {}
                }
                stdout.flush()?;
            }
            _ = tokio::signal::ctrl_c() => break true,
        }
    };
    if printed_any {
        writeln!(stdout)?;
    }

    if interrupted {
        engine.delete_job(id).await?;
        anyhow::bail!("Conversion interrupted");
    }

    let job = engine.get_job(id)?;
    match job.state {
        JobState::Successful => {
            let artifact = job
                .output_path
                .context("Successful job has no output file")?;
            let artifact = Path::new(&artifact);
            let name = job.display_name.unwrap_or_else(|| id.to_string());
            let target = match artifact.extension() {
                Some(ext) => format!("{}.{}", name, ext.to_string_lossy()),
                None => name,
            };

            std::fs::copy(artifact, &target)
                .with_context(|| format!("Failed to write {:?}", target))?;
            std::fs::remove_file(artifact).ok();
            println!("Saved {}", target);
            Ok(())
        }
        state => anyhow::bail!(
            "Conversion {}: {}",
            state,
            job.failure_reason.unwrap_or_default()
        ),
    }
}

fn list_jobs(config_path: Option<&Path>, state: Option<&str>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let db_path = config.storage.db_path();
    if !db_path.exists() {
        println!("No jobs yet");
        return Ok(());
    }

    let store = JobStore::open(&db_path)?;
    let jobs = match state {
        Some(state) => {
            let state: JobState = state.parse().map_err(anyhow::Error::msg)?;
            store.list_by_state(state)?
        }
        None => store.list()?,
    };

    if jobs.is_empty() {
        println!("No jobs yet");
        return Ok(());
    }

    for job in jobs {
        println!(
            "{}  {:<10}  {}  {}",
            job.id,
            job.state,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.display_name.as_deref().unwrap_or(&job.source)
        );
        if let Some(reason) = &job.failure_reason {
            println!("    {}", reason);
        }
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let program = &config.converter.program;

    println!("Checking external tools...\n");

    match which::which(program) {
        Ok(path) => {
            let version = std::process::Command::new(&path)
                .arg("--version")
                .output()
                .ok()
                .filter(|o| o.status.success())
                .and_then(|o| {
                    String::from_utf8_lossy(&o.stdout)
                        .lines()
                        .next()
                        .map(|s| s.to_string())
                });

            print!("✓ {}", program);
            if let Some(version) = version {
                print!(" ({})", version);
            }
            println!(" - {}", path.display());
            println!("\nAll required tools are available!");
        }
        Err(e) => {
            println!("✗ {} ({})", program, e);
            println!("\nThe converter is missing. Install it or set [converter] program.");
        }
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

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Data directory: {}", config.storage.data_dir.display());
    println!(
        "  Converter: {} {}",
        config.converter.program,
        config.converter.args.join(" ")
    );
    match config.engine.max_concurrent {
        0 => println!("  Concurrent conversions: unbounded"),
        n => println!("  Concurrent conversions: {}", n),
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mp3ify=trace,mp3ify_db=debug,mp3ify_common=debug,tower_http=debug".to_string()
        } else {
            "mp3ify=debug,mp3ify_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Convert { source } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(&source, cli.config.as_deref()))
        }
        Commands::List { state } => list_jobs(cli.config.as_deref(), state.as_deref()),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mp3ify {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
