//! Reading bit fields from RTCM payloads.
//!
//! RTCM 3 packs its data fields MSB-first without any byte alignment, so a
//! field may start anywhere within a byte and span several bytes.

/// Reads an unsigned integer of `length` bits starting at bit `position`.
///
/// Bits are numbered MSB-first, i.e. bit 0 is the most significant bit of
/// `data[0]`. Returns `None` if the field doesn't fit into `data`, or is wider
/// than 64 bits.
pub fn read_unsigned(data: &[u8], position: usize, length: usize) -> Option<u64> {
    if length > 64 || position + length > data.len() * 8 {
        return None;
    }

    let mut value = 0u64;
    for bit in position..position + length {
        let byte = data[bit / 8];
        value = (value << 1) | u64::from((byte >> (7 - bit % 8)) & 1);
    }

    Some(value)
}

/// Reads a two's complement signed integer of `length` bits starting at bit
/// `position`.
pub fn read_signed(data: &[u8], position: usize, length: usize) -> Option<i64> {
    let value = read_unsigned(data, position, length)?;

    if length == 0 {
        return Some(0);
    }

    // sign-extend by shifting the field to the top and back again
    let shift = 64 - length as u32;
    Some(((value << shift) as i64) >> shift)
}

/// Sequential reader over a bit-packed payload.
#[derive(Clone, Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Current position in bits.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position)
    }

    pub fn unsigned(&mut self, length: usize) -> Option<u64> {
        let value = read_unsigned(self.data, self.position, length)?;
        self.position += length;
        Some(value)
    }

    pub fn signed(&mut self, length: usize) -> Option<i64> {
        let value = read_signed(self.data, self.position, length)?;
        self.position += length;
        Some(value)
    }

    pub fn flag(&mut self) -> Option<bool> {
        self.unsigned(1).map(|bit| bit != 0)
    }

    pub fn skip(&mut self, length: usize) -> Option<()> {
        if length > self.remaining() {
            return None;
        }
        self.position += length;
        Some(())
    }
}
