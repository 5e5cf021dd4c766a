use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use clap::Parser;
use color_eyre::{Result, eyre::Context};
use revproxy::{
    adapters::{DnsResolver, FileConfigProvider, HttpHandler, HyperUpstreamConnector},
    config::{ProxyConfigValidator, loader::load_config},
    core::{ClientConnection, Forwarder, RoutingController, RuleTable},
    ports::config_provider::{ChangeKind, ConfigProvider},
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "revproxy.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "revproxy.toml")]
        config: String,
    },
    /// Write a starter configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "revproxy.toml")]
        config: String,
    },
    /// Start the proxy (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "revproxy.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config_provider = Arc::new(
        FileConfigProvider::new(config_path)
            .wrap_err_with(|| format!("Failed to open configuration {config_path}"))?,
    );
    let config = config_provider
        .load_config()
        .await
        .wrap_err("Failed to load initial configuration")?;

    tracing_setup::init_tracing(&config.logging)?;
    tracing::info!("Loaded configuration from {}", config_path);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .wrap_err_with(|| format!("Invalid listen address: {}", config.listen_addr))?;

    let (table, errors) = RuleTable::build(&config);
    if !errors.is_empty() {
        tracing::warn!(
            "{} revproxy directive(s) rejected; affected sites are inactive",
            errors.len()
        );
    }
    tracing::info!(
        sites = table.sites().len(),
        rules = table.rule_count(),
        "Routing table ready"
    );
    let rules = Arc::new(ArcSwap::from_pointee(table));

    let forwarder = Forwarder::new(
        Arc::new(DnsResolver::new()),
        Arc::new(HyperUpstreamConnector::new()?),
    );
    let handler = HttpHandler::new(rules.clone(), RoutingController::new(forwarder));

    spawn_config_watcher(config_provider, rules, config.listen_addr.clone());

    let graceful_shutdown = GracefulShutdown::new();
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("revproxy listening on {}", addr);

    let server_shutdown = graceful_shutdown.clone();
    let server = axum::serve(
        listener,
        handler
            .router()
            .into_make_service_with_connect_info::<ClientConnection>(),
    )
    .with_graceful_shutdown(async move {
        let reason = server_shutdown.wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received: {:?}", reason);
    });

    let drain_timeout = graceful_shutdown.drain_timeout();
    tokio::select! {
        result = server.into_future() => {
            result.context("Server error")?;
            tracing::info!("Graceful shutdown completed");
        }
        _ = async {
            graceful_shutdown.wait_for_shutdown_signal().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(
                "In-flight requests still running after {:?}, forcing shutdown",
                drain_timeout
            );
        }
    }

    tracing_setup::shutdown_tracing();
    Ok(())
}

/// Rebuild the routing table whenever the configuration file changes.
fn spawn_config_watcher(
    config_provider: Arc<FileConfigProvider>,
    rules: Arc<ArcSwap<RuleTable>>,
    listen_addr: String,
) {
    let Some(mut notify_rx) = config_provider.watch() else {
        tracing::warn!("Config watch channel unavailable; hot reload disabled");
        return;
    };
    let debounce_duration = Duration::from_secs(2);

    tokio::spawn(async move {
        tracing::info!("Config watcher task started.");
        let mut last_reload_attempt_time = tokio::time::Instant::now();
        last_reload_attempt_time = last_reload_attempt_time
            .checked_sub(debounce_duration)
            .unwrap_or(last_reload_attempt_time);

        while let Some(change) = notify_rx.recv().await {
            if change.kind == ChangeKind::Removed {
                tracing::warn!(
                    path = %change.path.display(),
                    "Config file removed; keeping current configuration until it reappears"
                );
                continue;
            }

            if last_reload_attempt_time.elapsed() < debounce_duration {
                tracing::info!(
                    path = %change.path.display(),
                    "Debouncing config reload event. Still within cooldown period."
                );
                while notify_rx.try_recv().is_ok() {}
                continue;
            }
            last_reload_attempt_time = tokio::time::Instant::now();

            tracing::info!(
                kind = %change.kind,
                "Attempting to reload configuration from {}",
                change.path.display()
            );

            match config_provider.load_config().await {
                Ok(new_config) => {
                    if new_config.listen_addr != listen_addr {
                        tracing::warn!(
                            "listen_addr changed to {}; restart required to rebind",
                            new_config.listen_addr
                        );
                    }
                    let (table, errors) = RuleTable::build(&new_config);
                    tracing::info!(
                        sites = table.sites().len(),
                        rules = table.rule_count(),
                        rejected = errors.len(),
                        "Routing table reloaded"
                    );
                    rules.store(Arc::new(table));
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to reload configuration: {:#}. Keeping old configuration.",
                        e
                    );
                }
            }
            while notify_rx.try_recv().is_ok() {}
        }
        tracing::info!("Config watcher task is shutting down.");
    });
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ProxyConfigValidator::validate(&config) {
        Ok(()) => {
            let (table, _) = RuleTable::build(&config);
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            for site in table.sites() {
                println!(
                    "   • Site '{}' at {}: {} rule(s)",
                    site.name(),
                    site.mount(),
                    site.rules().len()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Every directive needs regexp, server and uri attributes");
            println!("   • Quote attribute values: name=\"value\"");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# revproxy configuration

# The address to listen on
listen_addr = "127.0.0.1:8080"

[logging]
level = "info"
json = false

# A site without host names answers for any host.
[[vhosts]]
name = "default"
mount = "/"
rules = [
    # /p/42 -> http://localhost:3000/item/42
    'revproxy regexp="/p/(\d+)" server="localhost" port="3000" uri="item/$1"',
    # /secure/<rest> -> https://example.com/<rest>, fresh connection per request
    # 'revproxy regexp="/secure/(.*)" server="example.com" protocol="https" uri="$1" nopipeline',
]
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'revproxy serve --config {config_path}' to start the proxy");
    Ok(())
}
