use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use leasedns::{
    Config, DnsServer, LeaseSource, LeaseStore, Result, SourceKind, feed_leases, load_leases,
};

#[derive(Parser)]
#[command(name = "leasedns")]
#[command(author, version, about = "DNS responder for hosts holding active dhcpd leases", long_about = None)]
struct Cli {
    /// JSON config file; the flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local domain for replies
    #[arg(long)]
    domain: Option<String>,

    /// DNS UDP port
    #[arg(long)]
    dns_port: Option<u16>,

    /// DNS bind address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// dhcpd leases file
    #[arg(long)]
    dhcpd_leases: Option<PathBuf>,

    /// How to follow the leases file
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Quiet normal logging
    #[arg(long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    ShowConfig,
    ListLeases {
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(domain) = &self.domain {
            config.domain = domain.clone();
        }
        if let Some(port) = self.dns_port {
            config.dns_port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(leases_file) = &self.dhcpd_leases {
            config.leases_file = leases_file.clone();
        }
        if let Some(source) = self.source {
            config.source = source;
        }
        config.debug |= self.debug;
        config.quiet |= self.quiet;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{}", error);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter())),
        )
        .init();

    let result: Result<()> = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => return run(config).await,
        Commands::ShowConfig => serde_json::to_string_pretty(&config)
            .map(|json| println!("{}", json))
            .map_err(Into::into),
        Commands::ListLeases { json } => list_leases(&config, json).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{}", error);
            ExitCode::FAILURE
        }
    }
}

/// Serves until the feed or the listener fails, or a termination signal
/// arrives. Always ends with a failure status so a supervisor restarts it.
async fn run(config: Config) -> ExitCode {
    info!("Starting leasedns version {}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(LeaseStore::new());

    let mut source = match LeaseSource::open(&config).await {
        Ok(source) => source,
        Err(error) => {
            error!("Opening {}: {}", config.leases_file.display(), error);
            return ExitCode::FAILURE;
        }
    };

    let server = match DnsServer::new(&config, Arc::clone(&store)) {
        Ok(server) => server,
        Err(error) => {
            error!("Starting DNS: {}", error);
            source.close().await;
            return ExitCode::FAILURE;
        }
    };

    let reason = tokio::select! {
        result = feed_leases(&mut source, &store) => match result {
            Ok(()) => "lease feed stopped".to_string(),
            Err(error) => format!("Parse leases: {}", error),
        },
        result = server.run() => match result {
            Ok(()) => "DNS server stopped".to_string(),
            Err(error) => format!("Listen DNS: {}", error),
        },
        signal = shutdown_signal() => format!("Signal caught: {}", signal),
    };

    error!("{}", reason);
    source.close().await;
    ExitCode::FAILURE
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            }
        }
        Err(error) => {
            warn!("Cannot listen for SIGTERM: {}", error);
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

async fn list_leases(config: &Config, json: bool) -> Result<()> {
    let store = LeaseStore::new();
    let mut file = tokio::fs::File::open(&config.leases_file).await?;
    load_leases(&mut file, &store).await?;

    let leases = store.list().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&leases)?);
        return Ok(());
    }

    if leases.is_empty() {
        println!("No active leases.");
        return Ok(());
    }

    println!(
        "{:<32} {:<16} {:<24} {:<10}",
        "Hostname", "IP Address", "Ends At", "Remaining"
    );
    println!("{}", "-".repeat(84));

    let now = Utc::now();
    for lease in leases {
        println!(
            "{:<32} {:<16} {:<24} {:<10}",
            lease.hostname,
            lease.ip.to_string(),
            lease.ends.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            format!("{}s", lease.remaining(now).num_seconds())
        );
    }

    Ok(())
}
