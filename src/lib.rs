//! # NTRIP caster
//!
//! A caster relays GNSS correction data from base stations to rovers. Base
//! stations publish an RTCM 3 stream to a named mountpoint, and rovers
//! subscribe to it. Both talk NTRIP 1.0 over TCP.
//!
//! ```no_run
//! # async fn run() -> Result<(), ntrip_caster::Error> {
//! use ntrip_caster::{
//!     config::CasterConfig,
//!     credentials::StaticCredentials,
//!     server::CasterServer,
//! };
//! use tokio::net::TcpListener;
//!
//! let credentials = StaticCredentials::load("credentials.json").await?;
//! let tcp_listener = TcpListener::bind("0.0.0.0:2101").await.map_err(ntrip_caster::server::Error::from)?;
//! CasterServer::new(credentials, tcp_listener, CasterConfig::default())
//!     .serve()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod credentials;
pub mod geo;
pub mod ntrip;
pub mod registry;
pub mod relay;
pub mod rtcm;
pub mod server;

#[derive(Debug, thiserror::Error)]
#[error("ntrip caster error")]
pub enum Error {
    Server(#[from] server::Error),
    Credentials(#[from] credentials::Error),
    Geoid(#[from] geo::geoid::Error),
}
