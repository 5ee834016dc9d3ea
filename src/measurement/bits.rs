//! Packed forward/drop event sequence.

use std::io::{Read, Write};

use super::codec::{self, FormatError};

const BITS_VERSION: i32 = 1;
const WORD_BITS: u64 = 64;

/// Ordered sequence of packet events, one bit per packet (1 = forwarded, 0 = dropped).
///
/// Bits are packed into 64-bit words; each append shifts the last word left,
/// so the most recent bit of a word is always its least significant bit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EventBits {
    words: Vec<u64>,
    len: u64,
}

impl EventBits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity((bits as u64).div_ceil(WORD_BITS) as usize),
            len: 0,
        }
    }

    pub fn push(&mut self, forwarded: bool) {
        if self.len % WORD_BITS == 0 {
            self.words.push(0);
        }
        if let Some(last) = self.words.last_mut() {
            *last = (*last << 1) | u64::from(forwarded);
        }
        self.len += 1;
    }

    /// Appends `count` copies of the same event.
    pub fn push_repeated(&mut self, forwarded: bool, count: u64) {
        for _ in 0..count {
            self.push(forwarded);
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.words.clear();
        self.len = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        let mut remaining = self.len;
        self.words.iter().flat_map(move |&word| {
            let bits_in_word = remaining.min(WORD_BITS);
            remaining -= bits_in_word;
            (0..bits_in_word).rev().map(move |shift| (word >> shift) & 1 == 1)
        })
    }

    pub fn to_vec(&self) -> Vec<bool> {
        self.iter().collect()
    }

    pub fn count_dropped(&self) -> u64 {
        self.iter().filter(|forwarded| !forwarded).count() as u64
    }

    pub(crate) fn encode(&self, w: &mut impl Write) -> Result<(), FormatError> {
        codec::write_i32(w, BITS_VERSION)?;
        codec::write_len(w, self.words.len())?;
        for &word in &self.words {
            codec::write_u64(w, word)?;
        }
        codec::write_u64(w, self.len)
    }

    pub(crate) fn decode(r: &mut impl Read) -> Result<Self, FormatError> {
        let version = codec::read_i32(r)?;
        if version != BITS_VERSION {
            return Err(FormatError::UnsupportedVersion {
                record: "event sequence",
                version,
            });
        }
        let word_count = codec::read_len(r)?;
        let mut words = Vec::with_capacity(word_count.min(1 << 16));
        for _ in 0..word_count {
            words.push(codec::read_u64(r)?);
        }
        let len = codec::read_u64(r)?;
        if len.div_ceil(WORD_BITS) != word_count as u64 {
            return Err(FormatError::Invalid {
                what: "event sequence length",
                value: len as i64,
            });
        }
        Ok(Self { words, len })
    }
}

impl FromIterator<bool> for EventBits {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        let mut bits = EventBits::new();
        for forwarded in iter {
            bits.push(forwarded);
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_push_and_iterate_across_word_boundaries() {
        let mut bits = EventBits::new();
        let mut reference = Vec::new();
        for i in 0..100 {
            for _ in 0..i {
                bits.push(false);
                reference.push(false);
            }
            for _ in 0..i {
                bits.push(true);
                reference.push(true);
            }
            assert_eq!(bits.to_vec(), reference);
        }
        assert_eq!(bits.len(), reference.len() as u64);
    }

    #[test]
    fn test_count_dropped() {
        let bits: EventBits = [true, false, true, false, false].into_iter().collect();
        assert_eq!(bits.count_dropped(), 3);
        assert_eq!(bits.len(), 5);
    }

    #[test]
    fn test_decode_rejects_inconsistent_length() {
        let mut buf = Vec::new();
        codec::write_i32(&mut buf, BITS_VERSION).unwrap();
        codec::write_u32(&mut buf, 1).unwrap();
        codec::write_u64(&mut buf, 0b1011).unwrap();
        codec::write_u64(&mut buf, 130).unwrap();
        assert!(EventBits::decode(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_encode_decode_partial_word() {
        let bits: EventBits = (0..70).map(|i| i % 3 != 0).collect();
        let mut buf = Vec::new();
        bits.encode(&mut buf).unwrap();
        let decoded = EventBits::decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, bits);
        assert_eq!(decoded.to_vec(), bits.to_vec());
    }
}
