//! Stationary antenna reference point messages (1005 and 1006).

use bitflags::bitflags;
use serde::Serialize;

use crate::rtcm::{
    MessageType,
    bits::BitReader,
};

/// Number of bits in a 1005 message.
pub const ARP_BITS: usize = 152;

/// Number of bits in a 1006 message, which appends the antenna height.
pub const ARP_WITH_HEIGHT_BITS: usize = ARP_BITS + 16;

/// Scale of the ECEF coordinates and antenna height: 0.1 mm
const COORDINATE_SCALE: f64 = 1e-4;

/// Plausible range for the distance of an antenna from the earth's center, in
/// meters.
const PLAUSIBLE_RADIUS: std::ops::RangeInclusive<f64> = 6.0e6..=6.5e6;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct SystemIndicators: u8 {
        const GPS = 0b1000;
        const GLONASS = 0b0100;
        const GALILEO = 0b0010;
        const REFERENCE_STATION = 0b0001;
    }
}

/// Earth-centered, earth-fixed coordinates in meters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Ecef {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Ecef {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Whether this is roughly on the surface of the earth.
    pub fn is_plausible(&self) -> bool {
        PLAUSIBLE_RADIUS.contains(&self.magnitude())
    }
}

/// Decoded antenna reference point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AntennaReferencePoint {
    pub station_id: u16,
    pub itrf_year: u8,
    pub systems: SystemIndicators,
    pub single_receiver_oscillator: bool,
    pub quarter_cycle_indicator: u8,
    pub position: Ecef,
    /// Only present in message 1006
    pub antenna_height: Option<f64>,
}

impl AntennaReferencePoint {
    /// Decodes a 1005 or 1006 payload.
    ///
    /// Returns `None` if the payload is too short, isn't one of these two
    /// message types, or if the coordinates don't describe a point near the
    /// surface of the earth.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let mut reader = BitReader::new(payload);

        let message_type = MessageType(reader.unsigned(12)? as u16);
        let required_bits = match message_type {
            MessageType::ANTENNA_REFERENCE_POINT => ARP_BITS,
            MessageType::ANTENNA_REFERENCE_POINT_WITH_HEIGHT => ARP_WITH_HEIGHT_BITS,
            _ => return None,
        };
        if payload.len() * 8 < required_bits {
            return None;
        }

        let station_id = reader.unsigned(12)? as u16;
        let itrf_year = reader.unsigned(6)? as u8;
        let systems = SystemIndicators::from_bits_truncate(reader.unsigned(4)? as u8);
        let x = reader.signed(38)? as f64 * COORDINATE_SCALE;
        let single_receiver_oscillator = reader.flag()?;
        reader.skip(1)?;
        let y = reader.signed(38)? as f64 * COORDINATE_SCALE;
        let quarter_cycle_indicator = reader.unsigned(2)? as u8;
        let z = reader.signed(38)? as f64 * COORDINATE_SCALE;

        let antenna_height = if message_type == MessageType::ANTENNA_REFERENCE_POINT_WITH_HEIGHT {
            Some(reader.unsigned(16)? as f64 * COORDINATE_SCALE)
        }
        else {
            None
        };

        let position = Ecef { x, y, z };
        if !position.is_plausible() {
            tracing::trace!(?position, "discarding implausible antenna position");
            return None;
        }

        Some(Self {
            station_id,
            itrf_year,
            systems,
            single_receiver_oscillator,
            quarter_cycle_indicator,
            position,
            antenna_height,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use approx::assert_abs_diff_eq;

    use crate::rtcm::station::{
        AntennaReferencePoint,
        Ecef,
        SystemIndicators,
    };

    /// MSB-first bit writer, used to build synthetic payloads.
    #[derive(Default)]
    pub struct BitWriter {
        pub bytes: Vec<u8>,
        bits: usize,
    }

    impl BitWriter {
        /// Writes the low `length` bits of `value`. Bits above 64 are zero.
        pub fn put(&mut self, value: u64, length: usize) {
            for i in (0..length).rev() {
                if self.bits % 8 == 0 {
                    self.bytes.push(0);
                }
                let bit = value.checked_shr(i as u32).map_or(0, |value| (value & 1) as u8);
                let last = self.bytes.last_mut().unwrap();
                *last |= bit << (7 - self.bits % 8);
                self.bits += 1;
            }
        }

        pub fn put_signed(&mut self, value: i64, length: usize) {
            let mask = if length == 64 { u64::MAX } else { (1 << length) - 1 };
            self.put(value as u64 & mask, length);
        }
    }

    /// Builds a 1005 (or 1006 if `height` is set) payload.
    pub fn arp_payload(station_id: u16, ecef: Ecef, height: Option<f64>) -> Vec<u8> {
        let mut writer = BitWriter::default();
        writer.put(if height.is_some() { 1006 } else { 1005 }, 12);
        writer.put(station_id.into(), 12);
        writer.put(0, 6);
        writer.put(0b1101, 4);
        writer.put_signed((ecef.x * 1e4).round() as i64, 38);
        writer.put(1, 1);
        writer.put(0, 1);
        writer.put_signed((ecef.y * 1e4).round() as i64, 38);
        writer.put(0b10, 2);
        writer.put_signed((ecef.z * 1e4).round() as i64, 38);
        if let Some(height) = height {
            writer.put((height * 1e4).round() as u64, 16);
        }
        writer.bytes
    }

    #[test]
    fn it_decodes_1005() {
        let ecef = Ecef {
            x: -1_288_398.5741,
            y: 6_129_840.3216,
            z: 1_381_227.7324,
        };
        let payload = arp_payload(2003, ecef, None);
        assert_eq!(payload.len(), 19);

        let arp = AntennaReferencePoint::decode(&payload).unwrap();
        assert_eq!(arp.station_id, 2003);
        assert_eq!(
            arp.systems,
            SystemIndicators::GPS | SystemIndicators::GLONASS | SystemIndicators::REFERENCE_STATION
        );
        assert!(arp.single_receiver_oscillator);
        assert_eq!(arp.quarter_cycle_indicator, 0b10);
        assert_abs_diff_eq!(arp.position.x, ecef.x, epsilon = 1e-4);
        assert_abs_diff_eq!(arp.position.y, ecef.y, epsilon = 1e-4);
        assert_abs_diff_eq!(arp.position.z, ecef.z, epsilon = 1e-4);
        assert_eq!(arp.antenna_height, None);
    }

    #[test]
    fn it_decodes_1006_antenna_height() {
        let ecef = Ecef {
            x: 6_378_137.0,
            y: 0.0,
            z: 0.0,
        };
        let payload = arp_payload(1, ecef, Some(1.5321));
        assert_eq!(payload.len(), 21);

        let arp = AntennaReferencePoint::decode(&payload).unwrap();
        assert_abs_diff_eq!(arp.antenna_height.unwrap(), 1.5321, epsilon = 1e-4);
    }

    #[test]
    fn it_rejects_short_payloads() {
        let ecef = Ecef {
            x: 6_378_137.0,
            y: 0.0,
            z: 0.0,
        };
        let payload = arp_payload(1, ecef, Some(2.0));
        assert!(AntennaReferencePoint::decode(&payload[..19]).is_none());
        assert!(AntennaReferencePoint::decode(&payload[..2]).is_none());
        assert!(AntennaReferencePoint::decode(&[]).is_none());
    }

    #[test]
    fn it_rejects_implausible_positions() {
        let payload = arp_payload(
            1,
            Ecef {
                x: 1000.0,
                y: 0.0,
                z: 0.0,
            },
            None,
        );
        assert!(AntennaReferencePoint::decode(&payload).is_none());
    }

    #[test]
    fn it_ignores_other_message_types() {
        let mut writer = BitWriter::default();
        writer.put(1077, 12);
        writer.put(0, 200);
        assert_eq!(writer.bytes.len(), 27);
        assert!(AntennaReferencePoint::decode(&writer.bytes).is_none());
    }

    #[test]
    fn writer_zero_fills_wide_fields() {
        let mut writer = BitWriter::default();
        writer.put(u64::MAX, 72);
        assert_eq!(writer.bytes, vec![0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    }
}
