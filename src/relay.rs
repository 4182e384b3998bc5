//! Fan-out of a base station's byte stream to its rovers.

use std::{
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;

use crate::{
    geo::{
        ObservedPosition,
        geoid::GeoidGrid,
    },
    registry::BaseHandle,
    rtcm::FrameScanner,
};

/// Relays chunks from one base station.
#[derive(Debug)]
pub struct Relay {
    base: BaseHandle,
    scanner: FrameScanner,
    geoid: Option<Arc<GeoidGrid>>,
}

/// What happened to a chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Number of rovers the chunk was queued for.
    pub delivered: usize,

    /// Number of rovers that couldn't take the chunk, because their queue was
    /// full or they're disconnecting.
    pub skipped: usize,
}

impl Relay {
    pub fn new(base: BaseHandle, geoid: Option<Arc<GeoidGrid>>) -> Self {
        Self {
            base,
            scanner: FrameScanner::new(),
            geoid,
        }
    }

    pub fn base(&self) -> &BaseHandle {
        &self.base
    }

    /// Relays a chunk to all rovers currently subscribed.
    ///
    /// The chunk is passed on unchanged. Frames in it are only inspected to
    /// keep track of message types and the base station's position.
    pub fn push(&mut self, chunk: Bytes) -> FanOut {
        let frames = self.scanner.push(&chunk);

        let position = frames
            .iter()
            .filter_map(|frame| frame.reference_point.as_ref())
            .filter_map(|reference_point| {
                ObservedPosition::from_reference_point(reference_point, self.geoid.as_deref())
            })
            .last();

        let now = Instant::now();

        self.base
            .registry()
            .with_base(&self.base, |session, rovers| {
                session.bytes_in += chunk.len() as u64;

                for frame in &frames {
                    if let Some(message_type) = frame.message_type {
                        *session.messages.entry(message_type).or_default() += 1;
                    }
                }

                if let Some(position) = position {
                    tracing::debug!(
                        station_id = position.station_id,
                        latitude = position.latitude,
                        longitude = position.longitude,
                        "base station position"
                    );
                    session.observed_position = Some(position);
                }

                let mut fan_out = FanOut::default();
                for connection_id in &session.subscribers {
                    let Some(rover) = rovers.get_mut(connection_id)
                    else {
                        continue;
                    };

                    if rover.sender.try_send(chunk.clone()).is_ok() {
                        rover.bytes_received += chunk.len() as u64;
                        rover.timeline.record(now, chunk.len());
                        fan_out.delivered += 1;
                    }
                    else {
                        tracing::trace!(rover = %connection_id, "rover can't keep up, skipping chunk");
                        fan_out.skipped += 1;
                    }
                }

                fan_out
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::SocketAddr,
        time::Duration,
    };

    use bytes::Bytes;

    use crate::{
        registry::Registry,
        relay::{
            FanOut,
            Relay,
        },
        rtcm::{
            MessageType,
            station::{
                Ecef,
                tests::arp_payload,
            },
            tests::{
                frame,
                message_frame,
            },
        },
    };

    fn address(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn each_rover_gets_the_chunk() {
        let registry = Registry::new(8, Duration::from_secs(5));
        let base = registry.register_base(registry.next_connection_id(), "TEST01", address(1), None);
        let mut a = registry
            .register_rover(registry.next_connection_id(), "TEST01", "a", address(2))
            .unwrap();
        let mut b = registry
            .register_rover(registry.next_connection_id(), "TEST01", "b", address(3))
            .unwrap();

        let mut relay = Relay::new(base, None);
        let fan_out = relay.push(Bytes::from_static(b"1234567"));
        assert_eq!(
            fan_out,
            FanOut {
                delivered: 2,
                skipped: 0
            }
        );

        assert_eq!(a.try_recv().unwrap(), Bytes::from_static(b"1234567"));
        assert_eq!(b.try_recv().unwrap(), Bytes::from_static(b"1234567"));

        assert_eq!(registry.rover(a.connection_id()).unwrap().bytes_received, 7);
        assert_eq!(registry.rover(b.connection_id()).unwrap().bytes_received, 7);
        assert_eq!(registry.base("TEST01").unwrap().bytes_in, 7);
    }

    #[test]
    fn chunks_arrive_unchanged_and_in_order() {
        let registry = Registry::new(64, Duration::from_secs(5));
        let base = registry.register_base(registry.next_connection_id(), "TEST01", address(1), None);
        let mut rover = registry
            .register_rover(registry.next_connection_id(), "TEST01", "a", address(2))
            .unwrap();

        let mut data = message_frame(1077);
        data.extend([0x00, 0xff, 0x13]);
        data.extend(message_frame(1087));

        let mut relay = Relay::new(base, None);
        for chunk in data.chunks(4) {
            relay.push(Bytes::copy_from_slice(chunk));
        }

        let mut received = vec![];
        while let Some(chunk) = rover.try_recv() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, data);

        let status = registry.base("TEST01").unwrap();
        assert_eq!(status.bytes_in, data.len() as u64);
        assert_eq!(
            status.message_types,
            vec![MessageType(1077), MessageType(1087)]
        );
    }

    #[test]
    fn full_queues_are_skipped() {
        let registry = Registry::new(1, Duration::from_secs(5));
        let base = registry.register_base(registry.next_connection_id(), "TEST01", address(1), None);
        let mut slow = registry
            .register_rover(registry.next_connection_id(), "TEST01", "slow", address(2))
            .unwrap();

        let mut relay = Relay::new(base, None);
        assert_eq!(relay.push(Bytes::from_static(b"abc")).delivered, 1);
        assert_eq!(
            relay.push(Bytes::from_static(b"def")),
            FanOut {
                delivered: 0,
                skipped: 1
            }
        );

        // the rover is still subscribed, and only got the first chunk.
        let status = registry.rover(slow.connection_id()).unwrap();
        assert_eq!(status.bytes_received, 3);
        assert_eq!(slow.try_recv().unwrap(), Bytes::from_static(b"abc"));
        assert_eq!(relay.push(Bytes::from_static(b"ghi")).delivered, 1);
    }

    #[test]
    fn it_learns_the_base_position() {
        let registry = Registry::new(8, Duration::from_secs(5));
        let base = registry.register_base(registry.next_connection_id(), "TEST01", address(1), None);

        let data = frame(&arp_payload(
            42,
            Ecef {
                x: 6_378_137.0,
                y: 0.0,
                z: 0.0,
            },
            Some(1.5),
        ));

        let mut relay = Relay::new(base, None);
        relay.push(Bytes::copy_from_slice(&data[..8]));
        assert!(registry.base("TEST01").unwrap().observed_position.is_none());
        relay.push(Bytes::copy_from_slice(&data[8..]));

        let position = registry
            .base("TEST01")
            .unwrap()
            .observed_position
            .unwrap();
        assert_eq!(position.station_id, 42);
        assert!(position.latitude.abs() < 1e-6);
        assert!(position.longitude.abs() < 1e-6);
        assert_eq!(position.antenna_height, Some(1.5));
    }
}
