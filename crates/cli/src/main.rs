use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use revenant_core::config::Config;
use revenant_core::page_host::NullPageHost;
use revenant_core::page_host::PageHost;
use revenant_core::tls::{self, CertPaths};
use revenant_core::Orchestrator;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "revenant", about = "Stealth browser automation orchestration server")]
struct Cli {
    #[arg(long, env = "REVENANT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Starts the dispatcher, binding the configured websocket port.
    Serve,
    /// Prints the resolved configuration as JSON and exits.
    PrintConfig,
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("REVENANT_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Serve => {
            let factory: revenant_core::pool::HostFactory =
                Arc::new(|id: String| Arc::new(NullPageHost::new(id)) as Arc<dyn PageHost>);
            let orchestrator = Orchestrator::new(config.clone(), factory);
            orchestrator.pool.initialize().await?;
            orchestrator.install_handlers().await;

            let tls_acceptor = if config.transport.tls_enabled {
                let paths = CertPaths::in_dir(&config.transport.certs_dir);
                tls::ensure_certificate(&paths, config.transport.cert_validity_days)?;
                let server_config = tls::build_server_config(&paths, &config.transport.min_tls_version)?;
                tracing::info!(certs_dir = %config.transport.certs_dir.display(), "tls enabled, serving wss://");
                Some(tokio_rustls::TlsAcceptor::from(server_config))
            } else {
                None
            };

            let server = revenant_core::server::DispatchServer::new(orchestrator.registry.clone(), orchestrator.events.clone());
            tracing::info!(port = config.transport.port, "starting dispatch server");
            server.serve(&config.transport.bind_addr, config.transport.port, tls_acceptor).await?;
            Ok(())
        }
    }
}
