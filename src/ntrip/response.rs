//! Responses the caster sends during the handshake.

use std::fmt::Write;

use crate::{
    config::CasterIdentity,
    registry::{
        MountpointStatus,
        Snapshot,
    },
};

pub const OK: &[u8] = b"ICY 200 OK\r\n\r\n";
pub const BAD_PASSWORD: &[u8] = b"ERROR - Bad Password\r\n";
pub const MOUNTPOINT_NOT_AVAILABLE: &[u8] = b"ERROR - Mountpoint not available\r\n";
pub const BAD_REQUEST: &[u8] = b"HTTP/1.0 400 Bad Request\r\n\r\n";
pub const FORBIDDEN: &[u8] = b"HTTP/1.0 403 Forbidden\r\n\r\n";

const SERVER: &str = concat!("NTRIP ", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Rejection of a rover with missing or wrong credentials.
pub fn unauthorized(mountpoint: &str) -> String {
    format!(
        "HTTP/1.0 401 Unauthorized\r\nServer: {SERVER}\r\nWWW-Authenticate: Basic realm=\"/{mountpoint}\"\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n"
    )
}

/// The complete sourcetable response, including the status line.
///
/// Lists one `STR` line per mountpoint that currently has a base station,
/// followed by the `CAS` line of this caster.
pub fn sourcetable(identity: &CasterIdentity, snapshot: &Snapshot) -> String {
    let mut body = String::new();

    for mountpoint in &snapshot.mountpoints {
        write_stream(&mut body, identity, mountpoint);
    }

    let _ = write!(
        body,
        "CAS;{};{};{};{};0;{};{:.2};{:.2};0.0.0.0;0;\r\n",
        identity.host,
        identity.port,
        identity.identifier,
        identity.operator,
        identity.country,
        identity.latitude,
        identity.longitude,
    );
    body.push_str("ENDSOURCETABLE\r\n");

    format!(
        "SOURCETABLE 200 OK\r\nServer: {SERVER}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn write_stream(body: &mut String, identity: &CasterIdentity, mountpoint: &MountpointStatus) {
    let messages = mountpoint
        .message_types
        .iter()
        .map(|message_type| message_type.0.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut systems = vec![];
    for message_type in &mountpoint.message_types {
        if let Some((constellation, _)) = message_type.msm() {
            if !systems.contains(&constellation) {
                systems.push(constellation);
            }
        }
    }

    let position = mountpoint.declared_position.unwrap_or_default();

    let _ = write!(
        body,
        "STR;{name};{name};RTCM 3;{messages};2;{systems};{network};{country};{latitude:.2};{longitude:.2};0;0;{generator};none;B;N;{bitrate};\r\n",
        name = mountpoint.mountpoint,
        systems = systems.join("+"),
        network = identity.identifier,
        country = identity.country,
        latitude = position.latitude,
        longitude = position.longitude,
        generator = env!("CARGO_PKG_NAME"),
        bitrate = mountpoint.bitrate(),
    );
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        time::Duration,
    };

    use crate::{
        config::CasterIdentity,
        geo::DeclaredPosition,
        ntrip::response::{
            sourcetable,
            unauthorized,
        },
        registry::Registry,
        rtcm::MessageType,
    };

    #[test]
    fn empty_sourcetable() {
        let registry = Registry::new(8, Duration::from_secs(5));
        let response = sourcetable(&CasterIdentity::default(), &registry.snapshot());

        assert!(response.starts_with("SOURCETABLE 200 OK\r\n"));
        assert!(response.ends_with("ENDSOURCETABLE\r\n"));
        assert!(!response.contains("STR;"));
        assert!(response.contains("CAS;localhost;2101;ntrip-caster;none;0;"));

        let (_, body) = response.split_once("\r\n\r\n").unwrap();
        assert!(response.contains(&format!("Content-Length: {}\r\n", body.len())));
    }

    #[test]
    fn it_lists_live_mountpoints() {
        let registry = Registry::new(8, Duration::from_secs(5));
        let address = SocketAddr::from(([127, 0, 0, 1], 1234));
        let base = registry.register_base(
            registry.next_connection_id(),
            "TEST01",
            address,
            Some(DeclaredPosition {
                latitude: 13.75,
                longitude: 100.5,
            }),
        );
        let _other = registry.register_base(registry.next_connection_id(), "TEST02", address, None);

        registry.with_base(&base, |session, _| {
            session.messages.insert(MessageType(1005), 1);
            session.messages.insert(MessageType(1077), 1);
            session.messages.insert(MessageType(1087), 1);
        });

        let response = sourcetable(&CasterIdentity::default(), &registry.snapshot());
        let lines = response.lines().collect::<Vec<_>>();

        let test01 = lines
            .iter()
            .find(|line| line.starts_with("STR;TEST01;"))
            .unwrap();
        let fields = test01.split(';').collect::<Vec<_>>();
        assert_eq!(fields[3], "RTCM 3");
        assert_eq!(fields[4], "1005,1077,1087");
        assert_eq!(fields[6], "GPS+GLONASS");
        assert_eq!(fields[9], "13.75");
        assert_eq!(fields[10], "100.50");

        let test02 = lines
            .iter()
            .find(|line| line.starts_with("STR;TEST02;"))
            .unwrap();
        let fields = test02.split(';').collect::<Vec<_>>();
        assert_eq!(fields[9], "0.00");
        assert_eq!(fields[10], "0.00");
    }

    #[test]
    fn unauthorized_names_the_realm() {
        let response = unauthorized("TEST01");
        assert!(response.starts_with("HTTP/1.0 401 Unauthorized\r\n"));
        assert!(response.contains("WWW-Authenticate: Basic realm=\"/TEST01\"\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }
}
