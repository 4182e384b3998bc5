use std::time::Duration;

use serde::Serialize;

/// Tunables of the caster.
#[derive(Clone, Debug, clap::Args)]
pub struct CasterConfig {
    /// Time a client has to send a complete request header.
    #[clap(
        long,
        env = "NTRIP_HANDSHAKE_TIMEOUT",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub handshake_timeout: Duration,

    /// Base stations that don't send anything for this long are disconnected.
    #[clap(
        long,
        env = "NTRIP_SOURCE_IDLE_TIMEOUT",
        default_value = "5m",
        value_parser = humantime::parse_duration
    )]
    pub source_idle_timeout: Duration,

    /// Maximum size of a request header in bytes.
    #[clap(long, env = "NTRIP_MAX_HEADER_SIZE", default_value = "8192")]
    pub max_header_size: usize,

    /// Number of chunks that can be queued for a rover before data is dropped
    /// for it.
    #[clap(long, env = "NTRIP_SUBSCRIBER_QUEUE_SIZE", default_value = "64")]
    pub subscriber_queue_size: usize,

    /// Window over which a rover's data rate is measured.
    #[clap(
        long,
        env = "NTRIP_RATE_WINDOW",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub rate_window: Duration,

    #[clap(flatten)]
    pub identity: CasterIdentity,
}

impl Default for CasterConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            source_idle_timeout: Duration::from_secs(300),
            max_header_size: 8192,
            subscriber_queue_size: 64,
            rate_window: Duration::from_secs(5),
            identity: Default::default(),
        }
    }
}

/// How the caster describes itself in the `CAS` line of the sourcetable.
#[derive(Clone, Debug, clap::Args, Serialize)]
pub struct CasterIdentity {
    #[clap(long = "caster-host", env = "NTRIP_CASTER_HOST", default_value = "localhost")]
    pub host: String,

    #[clap(long = "caster-port", env = "NTRIP_CASTER_PORT", default_value = "2101")]
    pub port: u16,

    #[clap(
        long = "caster-identifier",
        env = "NTRIP_CASTER_IDENTIFIER",
        default_value = "ntrip-caster"
    )]
    pub identifier: String,

    #[clap(long = "caster-operator", env = "NTRIP_CASTER_OPERATOR", default_value = "none")]
    pub operator: String,

    /// ISO 3166 country code
    #[clap(long = "caster-country", env = "NTRIP_CASTER_COUNTRY", default_value = "")]
    pub country: String,

    #[clap(
        long = "caster-latitude",
        env = "NTRIP_CASTER_LATITUDE",
        default_value = "0",
        allow_negative_numbers = true
    )]
    pub latitude: f64,

    #[clap(
        long = "caster-longitude",
        env = "NTRIP_CASTER_LONGITUDE",
        default_value = "0",
        allow_negative_numbers = true
    )]
    pub longitude: f64,
}

impl Default for CasterIdentity {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 2101,
            identifier: "ntrip-caster".to_owned(),
            operator: "none".to_owned(),
            country: String::new(),
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}
