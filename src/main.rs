use std::{
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::Error;
use ntrip_caster::{
    config::CasterConfig,
    credentials::{
        PasswordHash,
        StaticCredentials,
    },
    geo::geoid::GeoidGrid,
    registry::Registry,
    server::CasterServer,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match args.command {
        Command::Serve {
            address,
            credentials,
            geoid,
            status_interval,
            config,
        } => {
            serve(address, credentials, geoid, status_interval, config).await?;
        }
        Command::HashPassword { password } => {
            println!("{}", PasswordHash::new(&password));
        }
    }

    Ok(())
}

#[derive(Debug, Parser)]
pub struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the caster
    Serve {
        /// Address to listen on
        #[clap(short, long, env = "NTRIP_ADDRESS", default_value = "0.0.0.0:2101")]
        address: SocketAddr,

        /// JSON file with mountpoint and user credentials
        #[clap(short, long, env = "NTRIP_CREDENTIALS")]
        credentials: PathBuf,

        /// EGM96 15' geoid grid (`WW15MGH.DAC`)
        #[clap(long, env = "NTRIP_GEOID")]
        geoid: Option<PathBuf>,

        /// Log the status of all mountpoints at this interval
        #[clap(long, env = "NTRIP_STATUS_INTERVAL", value_parser = humantime::parse_duration)]
        status_interval: Option<Duration>,

        #[clap(flatten)]
        config: CasterConfig,
    },

    /// Hash a password for the credentials file
    HashPassword { password: String },
}

async fn serve(
    address: SocketAddr,
    credentials: PathBuf,
    geoid: Option<PathBuf>,
    status_interval: Option<Duration>,
    config: CasterConfig,
) -> Result<(), Error> {
    let credentials = StaticCredentials::load(&credentials).await?;
    tracing::info!(
        mountpoints = credentials.num_mountpoints(),
        users = credentials.num_users(),
        "loaded credentials"
    );

    let shutdown = CancellationToken::new();
    let tcp_listener = TcpListener::bind(address).await?;
    let mut server = CasterServer::new(credentials, tcp_listener, config).with_shutdown(shutdown.clone());

    if let Some(path) = geoid {
        match GeoidGrid::load(&path).await {
            Ok(geoid) => {
                tracing::info!(path = %path.display(), "loaded geoid grid");
                server = server.with_geoid(geoid);
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), ?error, "could not load geoid grid, heights will be ellipsoidal");
            }
        }
    }

    if let Some(status_interval) = status_interval {
        tokio::spawn(log_status(
            server.registry().clone(),
            status_interval,
            shutdown.clone(),
        ));
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(?error, "could not listen for ctrl-c");
                return;
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        }
    });

    server.serve().await?;

    Ok(())
}

async fn log_status(registry: Registry, interval: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                match serde_json::to_string(&registry.snapshot()) {
                    Ok(status) => tracing::info!(%status),
                    Err(error) => tracing::warn!(?error, "could not serialize status"),
                }
            }
        }
    }
}
