//! # RTCM 3 framing
//!
//! A frame consists of:
//!
//! ```plain
//! byte   0        1        2        3 .. 3+L   3+L .. 3+L+3
//! value  11010011 rrrrrrll llllllll payload    crc24q
//! ```
//!
//! The payload starts with the 12 bit message number. We only look at frames
//! for observability: to learn which messages a base station sends, and to pick
//! up its antenna position from messages 1005 and 1006. The byte stream that is
//! relayed to rovers is never touched.
//!
//! The CRC-24Q checksum is not verified. Frames with a corrupted checksum are
//! still classified.
//!
//! https://www.use-snip.com/kb/knowledge-base/rtcm-3-message-list/

pub mod bits;
pub mod station;

use std::fmt::{
    Debug,
    Display,
};

use bytes::{
    Buf,
    BytesMut,
};

use crate::rtcm::station::AntennaReferencePoint;

pub const PREAMBLE: u8 = 0xd3;
pub const HEADER_LENGTH: usize = 3;
pub const CHECKSUM_LENGTH: usize = 3;
pub const MAX_PAYLOAD_LENGTH: usize = 0x3ff;
pub const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + MAX_PAYLOAD_LENGTH + CHECKSUM_LENGTH;

/// 12 bit RTCM message number
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct MessageType(pub u16);

impl MessageType {
    pub const ANTENNA_REFERENCE_POINT: Self = Self(1005);
    pub const ANTENNA_REFERENCE_POINT_WITH_HEIGHT: Self = Self(1006);

    pub fn is_antenna_reference_point(&self) -> bool {
        matches!(
            *self,
            Self::ANTENNA_REFERENCE_POINT | Self::ANTENNA_REFERENCE_POINT_WITH_HEIGHT
        )
    }

    /// Constellation and MSM number for Multiple Signal Messages.
    pub fn msm(&self) -> Option<(&'static str, u8)> {
        let number = self.0.checked_sub(1070)?;
        let msm = (number % 10) as u8;
        if !(1..=7).contains(&msm) {
            return None;
        }
        let constellation = match number / 10 {
            0 => "GPS",
            1 => "GLONASS",
            2 => "Galileo",
            3 => "SBAS",
            4 => "QZSS",
            5 => "BeiDou",
            6 => "NavIC",
            _ => return None,
        };
        Some((constellation, msm))
    }

    /// Human readable message group.
    pub fn category(&self) -> &'static str {
        if self.msm().is_some() {
            return "Multi-Service Messages";
        }
        match self.0 {
            1001..=1004 => "GPS RTK Observables",
            1005 | 1006 => "Station Antenna Reference Point",
            1007 | 1008 | 1033 => "Antenna and Receiver Descriptor",
            1009..=1012 => "GLONASS RTK Observables",
            1013 => "System Parameters",
            1015..=1017 => "GPS Network RTK Corrections",
            1019 => "GPS Ephemeris",
            1020 => "GLONASS Ephemeris",
            1021..=1027 => "Coordinate Transformation",
            1029 => "Unicode Text String",
            1030 | 1031 => "Network RTK Residuals",
            1032 => "Physical Reference Station Position",
            1034 | 1035 => "Network FKP Gradient",
            1037..=1039 => "GLONASS Network RTK Corrections",
            1041 => "NavIC Ephemeris",
            1042 => "BeiDou Ephemeris",
            1044 => "QZSS Ephemeris",
            1045 | 1046 => "Galileo Ephemeris",
            1057..=1068 => "State Space Representation",
            1230 => "GLONASS Code-Phase Biases",
            4001..=4095 => "Proprietary Messages",
            _ => "Unknown",
        }
    }
}

impl Debug for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageType({})", self.0)
    }
}

/// Formats as e.g. `1077 Multi-Service Messages (GPS MSM7)`
impl Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.0, self.category())?;
        if let Some((constellation, msm)) = self.msm() {
            write!(f, " ({constellation} MSM{msm})")?;
        }
        Ok(())
    }
}

/// A frame found by the scanner.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub payload_length: usize,

    /// Only frames with at least 2 payload bytes have a message type.
    pub message_type: Option<MessageType>,

    /// Set for valid 1005 and 1006 messages.
    pub reference_point: Option<AntennaReferencePoint>,
}

impl Frame {
    fn from_payload(payload: &[u8]) -> Self {
        let message_type = (payload.len() >= 2)
            .then(|| bits::read_unsigned(payload, 0, 12))
            .flatten()
            .map(|value| MessageType(value as u16));

        let reference_point = message_type
            .filter(MessageType::is_antenna_reference_point)
            .and_then(|_| AntennaReferencePoint::decode(payload));

        Self {
            payload_length: payload.len(),
            message_type,
            reference_point,
        }
    }
}

/// Result of [`scan`]
#[derive(Clone, Debug, Default)]
pub struct Scan {
    pub frames: Vec<Frame>,

    /// Number of bytes that were fully processed. Anything after this is the
    /// start of a frame that isn't complete yet.
    pub consumed: usize,
}

/// Scans `data` for complete frames.
///
/// Bytes that aren't the preamble are skipped one at a time. Scanning stops at
/// the first frame that doesn't fit into `data`.
pub fn scan(data: &[u8]) -> Scan {
    let mut frames = vec![];
    let mut position = 0;

    while position < data.len() {
        if data[position] != PREAMBLE {
            position += 1;
            continue;
        }

        if position + HEADER_LENGTH > data.len() {
            break;
        }
        let payload_length =
            (usize::from(data[position + 1] & 0b11) << 8) | usize::from(data[position + 2]);
        let payload_start = position + HEADER_LENGTH;
        let payload_end = payload_start + payload_length;
        let frame_end = payload_end + CHECKSUM_LENGTH;
        if frame_end > data.len() {
            break;
        }

        frames.push(Frame::from_payload(&data[payload_start..payload_end]));
        position = frame_end;
    }

    Scan {
        frames,
        consumed: position,
    }
}

/// Incremental scanner that keeps partial frames across chunks.
///
/// A frame that is split across two reads from the network is completed with
/// the next chunk. At most one partial frame ([`MAX_FRAME_LENGTH`] bytes) is
/// kept.
#[derive(Debug, Default)]
pub struct FrameScanner {
    pending: BytesMut,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.pending.is_empty() {
            let scan = scan(chunk);
            self.pending.extend_from_slice(&chunk[scan.consumed..]);
            scan.frames
        }
        else {
            self.pending.extend_from_slice(chunk);
            let scan = scan(&self.pending);
            self.pending.advance(scan.consumed);
            scan.frames
        }
    }

    /// Number of bytes held back for an incomplete frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::rtcm::{
        FrameScanner,
        MessageType,
        PREAMBLE,
        scan,
        station::{
            Ecef,
            tests::arp_payload,
        },
    };

    /// Wraps a payload into a frame with a zeroed checksum.
    pub fn frame(payload: &[u8]) -> Vec<u8> {
        let length = payload.len();
        let mut frame = vec![PREAMBLE, (length >> 8) as u8 & 0b11, length as u8];
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&[0, 0, 0]);
        frame
    }

    /// Frame with only the message number and some padding.
    pub fn message_frame(message_type: u16) -> Vec<u8> {
        frame(&[
            (message_type >> 4) as u8,
            ((message_type & 0xf) << 4) as u8,
            0,
            0,
        ])
    }

    #[test]
    fn it_finds_one_frame() {
        let data = message_frame(1077);
        let scan = scan(&data);
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.frames[0].message_type, Some(MessageType(1077)));
        assert_eq!(scan.frames[0].payload_length, 4);
        assert_eq!(scan.consumed, 3 + 4 + 3);
    }

    #[test]
    fn it_skips_garbage_between_frames() {
        let mut data = vec![0x00, 0x42];
        data.extend(message_frame(1074));
        data.extend([0x13, 0x37]);
        data.extend(message_frame(1230));
        let scan = scan(&data);
        let types = scan
            .frames
            .iter()
            .map(|frame| frame.message_type.unwrap().0)
            .collect::<Vec<_>>();
        assert_eq!(types, vec![1074, 1230]);
        assert_eq!(scan.consumed, data.len());
    }

    #[test]
    fn it_stops_at_truncated_frames() {
        let data = message_frame(1077);
        for length in 0..data.len() {
            let scan = scan(&data[..length]);
            assert!(scan.frames.is_empty());
            if length > 0 {
                assert_eq!(scan.consumed, 0);
            }
        }
    }

    #[test]
    fn it_reads_the_10_bit_length() {
        let payload = vec![0u8; 300];
        let data = frame(&payload);
        assert_eq!(data[1], 0x01);
        assert_eq!(data[2], 0x2c);
        let scan = scan(&data);
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.frames[0].payload_length, 300);
        assert_eq!(scan.consumed, 306);
    }

    #[test]
    fn short_payloads_have_no_message_type() {
        let data = frame(&[0x43]);
        let scan = scan(&data);
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.frames[0].message_type, None);
    }

    #[test]
    fn it_decodes_reference_points() {
        let payload = arp_payload(
            7,
            Ecef {
                x: 6_378_137.0,
                y: 0.0,
                z: 0.0,
            },
            None,
        );
        let scan = scan(&frame(&payload));
        let arp = scan.frames[0].reference_point.unwrap();
        assert_eq!(arp.station_id, 7);
    }

    #[test]
    fn scanner_completes_split_frames() {
        let mut data = message_frame(1005);
        data.extend(message_frame(1077));
        let mut scanner = FrameScanner::new();

        let frames = scanner.push(&data[..5]);
        assert!(frames.is_empty());
        assert_eq!(scanner.pending(), 5);

        let frames = scanner.push(&data[5..15]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type, Some(MessageType(1005)));
        assert_eq!(scanner.pending(), 5);

        let frames = scanner.push(&data[15..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type, Some(MessageType(1077)));
        assert_eq!(scanner.pending(), 0);
    }

    #[test]
    fn it_classifies_messages() {
        assert_eq!(
            MessageType(1077).to_string(),
            "1077 Multi-Service Messages (GPS MSM7)"
        );
        assert_eq!(
            MessageType(1124).to_string(),
            "1124 Multi-Service Messages (BeiDou MSM4)"
        );
        assert_eq!(
            MessageType(1005).to_string(),
            "1005 Station Antenna Reference Point"
        );
        assert_eq!(MessageType(1080).category(), "Unknown");
        assert_eq!(MessageType(4072).category(), "Proprietary Messages");
    }
}
