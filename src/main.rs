mod cli;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use tokio_util::sync::CancellationToken;

use cf_core::config::Config;
use cf_core::TaskId;
use cf_db::models::TaskFilter;
use clipforge::{spawn_workers, AppContext, SubmitTask};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "clipforge=trace,cf_pipeline=trace,cf_av=debug,cf_db=debug,cf_core=debug".to_string()
        } else {
            "clipforge=info,cf_pipeline=info,cf_av=info,cf_db=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Work { workers } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(work(config_path, workers))
        }
        Commands::Submit { file } => {
            let body = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut body = String::new();
                    std::io::stdin().read_to_string(&mut body)?;
                    body
                }
            };
            let request: SubmitTask =
                serde_json::from_str(&body).context("Invalid task request")?;
            let task = context(config_path)?.service().submit(request)?;
            print_json(&task)
        }
        Commands::Status { id } => {
            let service = context(config_path)?.service();
            let id = parse_id(&id)?;
            let task = service.get(id)?;
            let operations = service.operations(id)?;
            print_json(&serde_json::json!({ "task": task, "operations": operations }))
        }
        Commands::List {
            status,
            task_type,
            offset,
            limit,
        } => {
            let filter = TaskFilter {
                status: status.as_deref().map(str::parse).transpose()?,
                task_type: task_type.as_deref().map(str::parse).transpose()?,
            };
            let tasks = context(config_path)?.service().list(&filter, offset, limit)?;
            print_json(&tasks)
        }
        Commands::Retry { id } => {
            let task = context(config_path)?.service().retry(parse_id(&id)?)?;
            print_json(&task)
        }
        Commands::Cancel { id } => {
            let task = context(config_path)?.service().cancel(parse_id(&id)?)?;
            print_json(&task)
        }
        Commands::Queue => {
            let status = context(config_path)?.service().queue_status()?;
            print_json(&status)
        }
        Commands::PurgeCache => {
            let removed = context(config_path)?.service().purge_cache()?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("clipforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn context(config_path: Option<&Path>) -> Result<AppContext> {
    let config = Config::load_or_default(config_path);
    Ok(AppContext::new(config)?)
}

fn parse_id(id: &str) -> Result<TaskId> {
    id.parse()
        .map_err(|e| anyhow::anyhow!("Invalid task id '{id}': {e}"))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn work(config_path: Option<&Path>, workers: Option<usize>) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    if let Some(count) = workers {
        config.workers.count = count;
    }
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }

    let ctx = AppContext::new(config)?;
    for tool in ctx.tools.check_all() {
        if !tool.available {
            tracing::warn!("{} not found; tasks needing it will fail", tool.name);
        }
    }

    let shutdown = CancellationToken::new();
    let handles = spawn_workers(&ctx, shutdown.clone());
    tracing::info!("Started {} workers", handles.len());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    shutdown.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker panicked: {e}");
        }
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let tools = cf_av::ToolRegistry::discover(&config.tools);

    println!("Checking required tools...\n");

    let mut all_ok = true;
    for tool in tools.check_all() {
        let status = if tool.available { "OK" } else { "MISSING" };
        let version = tool.version.as_deref().unwrap_or("-");
        let path = tool
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".into());
        println!("{:<10} {:<8} {:<40} {}", tool.name, status, version, path);
        all_ok &= tool.available;
    }

    if !all_ok {
        println!("\nSome tools are missing. Install ffmpeg (which ships ffprobe).");
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        anyhow::bail!("No config file given; use --config <path>");
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = Config::from_json(&contents)?;

    println!("Configuration is valid.");
    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }
    Ok(())
}
