//! epistery-host CLI: run the multi-tenant agent host.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;

use epistery_host::agent::AgentCatalog;
use epistery_host::config::HostConfig;
use epistery_host::discovery;
use epistery_host::domain::{DomainStore, TomlDomainStore};
use epistery_host::error::{HostError, HostResult};
use epistery_host::lifecycle::{self, LifecycleController, ShutdownOutcome};
use epistery_host::loader::AgentLoader;
use epistery_host::namespace::MountPaths;
use epistery_host::paths::HostPaths;
use epistery_host::server::{self, HostState};

#[derive(Parser)]
#[command(name = "epistery-host", version, about = "Multi-tenant host for epistery agents")]
struct Cli {
    /// Host config file (default: $XDG_CONFIG_HOME/epistery/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing one subdirectory per agent.
    #[arg(long, global = true)]
    agents_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every agent and serve HTTP until a termination signal.
    Serve {
        /// Address to bind to.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Scan the agents directory and report what would be loaded.
    Agents,

    /// Create the host directories and a default config file.
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn")),
        )
        .init();

    let cli = Cli::parse();
    let paths = HostPaths::resolve().map_err(HostError::from)?;

    match cli.command {
        Commands::Init => init(&paths)?,
        Commands::Agents => {
            let config = load_config(cli.config, cli.agents_dir, &paths)?;
            list_agents(&config, &paths)?;
        }
        Commands::Serve { bind, port } => {
            let mut config = load_config(cli.config, cli.agents_dir, &paths)?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config, &paths).await?;
        }
    }

    Ok(())
}

/// Defaults, then the config file, then `EPISTERY_*`, then flags.
fn load_config(
    explicit: Option<PathBuf>,
    agents_dir: Option<PathBuf>,
    paths: &HostPaths,
) -> HostResult<HostConfig> {
    let mut config = match explicit {
        Some(path) => HostConfig::load(&path)?,
        None => HostConfig::load_or_default(&paths.config_file())?,
    };
    config.apply_env()?;
    if let Some(dir) = agents_dir {
        config.agents_dir = Some(dir);
    }
    Ok(config)
}

fn init(paths: &HostPaths) -> HostResult<()> {
    paths.ensure_dirs()?;
    let config_file = paths.config_file();
    if config_file.exists() {
        println!("Config already exists: {}", config_file.display());
    } else {
        HostConfig::default().save(&config_file)?;
        println!("Wrote default config: {}", config_file.display());
    }
    println!("Agents directory:  {}", paths.default_agents_dir().display());
    println!("Domains directory: {}", paths.default_domains_dir().display());
    Ok(())
}

fn list_agents(config: &HostConfig, paths: &HostPaths) -> HostResult<()> {
    let root = config.agents_dir(paths);
    let scan = discovery::scan(&root)?;

    println!("Agents directory: {}", root.display());
    if scan.records.is_empty() && scan.anomalies.is_empty() {
        println!("  (no agents)");
        return Ok(());
    }

    for record in &scan.records {
        let mount = MountPaths::for_manifest_name(&record.manifest.name)
            .map(|m| m.short)
            .unwrap_or_else(|e| format!("<{e}>"));
        println!(
            "  {:<24} {:<32} {}",
            record.local_name, record.manifest.name, mount
        );
    }
    for anomaly in &scan.anomalies {
        println!("  {:<24} skipped: {}", anomaly.local_name, anomaly.kind);
    }
    Ok(())
}

async fn serve(config: HostConfig, paths: &HostPaths) -> HostResult<()> {
    let controller = Arc::new(LifecycleController::new(
        config.agents_dir(paths),
        AgentLoader::new(AgentCatalog::builtin()),
        config.shutdown_timeout(),
    ));
    let startup = controller.start().await?;

    let domains: Arc<dyn DomainStore> = Arc::new(TomlDomainStore::new(config.domains_dir(paths)));
    let state = Arc::new(HostState {
        registry: Arc::clone(&startup.registry),
        domains,
        lifecycle: Arc::clone(&controller),
        admin_token: config.admin_token.clone(),
        default_domain: config.default_domain.clone(),
    });
    let app = server::build_app(state, startup.router);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| HostError::Bind {
            addr: addr.clone(),
            source: e,
        })?;
    tracing::info!(%addr, agents = startup.registry.len(), "epistery-host listening");

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let server = tokio::spawn(server::serve(listener, app, async move {
        let _ = stop_rx.wait_for(|stop| *stop).await;
    }));

    lifecycle::termination_signal().await;
    let _ = stop_tx.send(true);

    // Repeat signals are only logged; the shutdown timeout bounds the wait.
    let repeats = tokio::spawn(async {
        loop {
            lifecycle::termination_signal().await;
            tracing::warn!("shutdown already in progress, waiting for agent cleanup");
        }
    });

    let outcome = controller.shutdown().await;
    repeats.abort();
    let outcome = outcome?;

    match tokio::time::timeout(config.shutdown_timeout(), server).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => tracing::error!(error = %e, "server task failed"),
        Err(_) => tracing::warn!("in-flight connections did not close in time"),
    }

    if let ShutdownOutcome::Completed(report) = outcome {
        if report.hit_deadline() {
            tracing::warn!(
                abandoned = ?report.timed_out,
                "agent cleanup hit the shutdown timeout, forcing exit"
            );
            std::process::exit(1);
        }
    }

    tracing::info!("epistery-host stopped");
    Ok(())
}
