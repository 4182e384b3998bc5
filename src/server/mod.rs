//! The caster's TCP server.

mod connection;

use std::{
    net::SocketAddr,
    sync::Arc,
};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    config::CasterConfig,
    credentials::CredentialStore,
    geo::geoid::GeoidGrid,
    registry::Registry,
};

/// Server errors
#[derive(Debug, thiserror::Error)]
#[error("ntrip caster error")]
pub enum Error {
    Io(#[from] std::io::Error),
}

/// A NTRIP caster.
///
/// Accepts base stations and rovers on the same port, and relays data from
/// each base station to the rovers subscribed to its mountpoint.
#[derive(Debug)]
pub struct CasterServer<C> {
    credentials: C,
    tcp_listener: TcpListener,
    registry: Registry,
    config: CasterConfig,
    geoid: Option<Arc<GeoidGrid>>,
    shutdown: CancellationToken,
}

impl<C> CasterServer<C> {
    pub fn new(credentials: C, tcp_listener: TcpListener, config: CasterConfig) -> Self {
        let registry = Registry::new(config.subscriber_queue_size, config.rate_window);
        Self {
            credentials,
            tcp_listener,
            registry,
            config,
            geoid: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Provide a [`CancellationToken`] with which the server (and all client
    /// connections) can be shut down.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Use a geoid grid to compute orthometric heights of base stations.
    pub fn with_geoid(mut self, geoid: GeoidGrid) -> Self {
        self.geoid = Some(Arc::new(geoid));
        self
    }

    /// Use an existing registry, e.g. to share it with another server.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.tcp_listener.local_addr()?)
    }
}

impl<C: CredentialStore> CasterServer<C> {
    /// Serve incoming connections
    pub async fn serve(self) -> Result<(), Error> {
        tracing::info!(address = ?self.tcp_listener.local_addr().ok(), "waiting for connections");

        let context = Arc::new(Context {
            credentials: self.credentials,
            registry: self.registry,
            config: self.config,
            geoid: self.geoid,
            shutdown: self.shutdown,
        });

        loop {
            tokio::select! {
                _ = context.shutdown.cancelled() => break,
                result = self.tcp_listener.accept() => {
                    let (connection, address) = result?;
                    let context = context.clone();
                    let span = tracing::info_span!("connection", %address);
                    tokio::spawn(
                        async move {
                            tracing::debug!(%address, "new connection");
                            if let Err(error) = connection::handle_connection(connection, address, &context).await {
                                tracing::error!(?error);
                            }
                            tracing::debug!(%address, "closing connection");
                        }.instrument(span)
                    );
                }
            }
        }

        Ok(())
    }
}

/// State shared by all connections of a server.
#[derive(Debug)]
struct Context<C> {
    credentials: C,
    registry: Registry,
    config: CasterConfig,
    geoid: Option<Arc<GeoidGrid>>,
    shutdown: CancellationToken,
}
