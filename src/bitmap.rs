//! Packed edge bitmaps.
//!
//! A trace's interned edge set is stored as a bit-vector indexed by edge id
//! and then compressed. Ids are dense and allocated from 1, so for real traces
//! the bit-vector is far smaller than the set of edge strings it stands for.
//!
//! # Representation
//!
//! ```text
//! EdgeBitmap:
//!   bits: Vec<u8>  ──→  [b₀b₁...b₇|b₈b₉...b₁₅|...]   (LSB-first inside each byte)
//!
//! Packed envelope (16-byte header, then the compressed bit bytes):
//!   [0..4)   magic  b"EBM1"
//!   [4]      codec  (0 = none, 1 = zstd, 2 = lz4)
//!   [5]      reserved
//!   [6..8)   reserved u16
//!   [8..16)  bit length, u64 little-endian
//! ```
//!
//! A set whose largest id is `n` needs `n + 1` bits no matter how few ids it
//! holds. One large outlier therefore costs a long run of zero bytes, which
//! the compressor folds away.
//!
//! Bit lengths are capped at [`MAX_BIT_LEN`] (512 MiB of raw bits); ids at or
//! above it are rejected instead of being allocated for.

use crate::error::CodecError;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const MAGIC: &[u8; 4] = b"EBM1";
const HEADER_LEN: usize = 16;

/// Largest bit length a bitmap may have. Encodable ids are `0..MAX_BIT_LEN`.
pub const MAX_BIT_LEN: u64 = 1 << 32;

#[cfg(feature = "compression-zstd")]
const ZSTD_LEVEL: i32 = 3;

/// Compression applied to the bit bytes of a packed bitmap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Codec {
    None = 0,
    Zstd = 1,
    Lz4 = 2,
}

impl Codec {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Codec::None),
            1 => Some(Codec::Zstd),
            2 => Some(Codec::Lz4),
            _ => None,
        }
    }

    /// Whether this build can compress and decompress with the codec.
    pub fn is_enabled(self) -> bool {
        match self {
            Codec::None => true,
            Codec::Zstd => cfg!(feature = "compression-zstd"),
            Codec::Lz4 => cfg!(feature = "compression-lz4"),
        }
    }
}

impl Default for Codec {
    /// The strongest codec compiled in.
    fn default() -> Self {
        if cfg!(feature = "compression-zstd") {
            Codec::Zstd
        } else if cfg!(feature = "compression-lz4") {
            Codec::Lz4
        } else {
            Codec::None
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Codec::None => "none",
            Codec::Zstd => "zstd",
            Codec::Lz4 => "lz4",
        };
        f.write_str(name)
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Codec::None),
            "zstd" => Ok(Codec::Zstd),
            "lz4" => Ok(Codec::Lz4),
            other => Err(format!("unknown codec {other:?} (expected none, zstd or lz4)")),
        }
    }
}

/// Bit-vector over edge ids.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct EdgeBitmap {
    /// Number of logical bits
    len: u64,
    bits: Vec<u8>,
}

impl EdgeBitmap {
    /// Create an all-zero bitmap of `len` bits.
    pub fn new_zero(len: u64) -> Result<Self, CodecError> {
        if len > MAX_BIT_LEN {
            return Err(CodecError::LengthOutOfRange(len));
        }
        Ok(Self {
            len,
            bits: vec![0u8; byte_len(len) as usize],
        })
    }

    /// Build the bitmap for a set of ids; its length is `max(ids) + 1`.
    pub fn from_ids(ids: &BTreeSet<u64>) -> Result<Self, CodecError> {
        let Some(&max) = ids.last() else {
            return Ok(Self::default());
        };
        if max >= MAX_BIT_LEN {
            return Err(CodecError::IdOutOfRange {
                id: max,
                limit: MAX_BIT_LEN,
            });
        }
        let mut bitmap = Self::new_zero(max + 1)?;
        for &id in ids {
            bitmap.insert(id);
        }
        Ok(bitmap)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw bit bytes, LSB-first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn contains(&self, id: u64) -> bool {
        if id >= self.len {
            return false;
        }
        (self.bits[(id / 8) as usize] >> (id % 8)) & 1 == 1
    }

    /// Set bit `id`. Out-of-range ids are ignored.
    pub fn insert(&mut self, id: u64) {
        if id >= self.len {
            return;
        }
        self.bits[(id / 8) as usize] |= 1 << (id % 8);
    }

    /// Number of set bits.
    pub fn count(&self) -> u64 {
        self.bits.iter().map(|b| u64::from(b.count_ones())).sum()
    }

    /// Indices of set bits in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, byte)| **byte != 0)
            .flat_map(|(i, &byte)| {
                (0..8u64)
                    .filter(move |bit| (byte >> bit) & 1 == 1)
                    .map(move |bit| i as u64 * 8 + bit)
            })
    }

    pub fn to_set(&self) -> BTreeSet<u64> {
        self.ids().collect()
    }

    /// Serialize into a packed envelope compressed with `codec`.
    pub fn pack(&self, codec: Codec) -> Result<Vec<u8>, CodecError> {
        let payload = compress(codec, &self.bits)?;
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(MAGIC);
        out.push(codec as u8);
        out.push(0);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Parse a packed envelope produced by [`EdgeBitmap::pack`].
    pub fn unpack(blob: &[u8]) -> Result<Self, CodecError> {
        if blob.len() < HEADER_LEN {
            return Err(CodecError::Truncated(blob.len()));
        }
        if &blob[..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let codec = Codec::from_u8(blob[4]).ok_or(CodecError::UnknownCodec(blob[4]))?;
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&blob[8..HEADER_LEN]);
        let len = u64::from_le_bytes(len_bytes);
        if len > MAX_BIT_LEN {
            return Err(CodecError::LengthOutOfRange(len));
        }

        let mut bits = decompress(codec, &blob[HEADER_LEN..])?;
        let expected = byte_len(len);
        if bits.len() as u64 != expected {
            return Err(CodecError::SizeMismatch {
                expected,
                actual: bits.len() as u64,
            });
        }

        // Padding bits past `len` carry no ids.
        let tail = len % 8;
        if tail != 0 {
            if let Some(last) = bits.last_mut() {
                *last &= (1u8 << tail) - 1;
            }
        }

        Ok(Self { len, bits })
    }
}

/// Encode a set of ids as a packed bitmap.
pub fn encode(ids: &BTreeSet<u64>, codec: Codec) -> Result<Vec<u8>, CodecError> {
    EdgeBitmap::from_ids(ids)?.pack(codec)
}

/// Decode a packed bitmap back into its set of ids.
pub fn decode(blob: &[u8]) -> Result<BTreeSet<u64>, CodecError> {
    Ok(EdgeBitmap::unpack(blob)?.to_set())
}

#[inline]
fn byte_len(bits: u64) -> u64 {
    bits.div_ceil(8)
}

fn compress(codec: Codec, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    match codec {
        Codec::None => Ok(raw.to_vec()),
        Codec::Zstd => zstd_compress(raw),
        Codec::Lz4 => lz4_compress(raw),
    }
}

fn decompress(codec: Codec, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    match codec {
        Codec::None => Ok(payload.to_vec()),
        Codec::Zstd => zstd_decompress(payload),
        Codec::Lz4 => lz4_decompress(payload),
    }
}

#[cfg(feature = "compression-zstd")]
fn zstd_compress(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::bulk::compress(raw, ZSTD_LEVEL).map_err(CodecError::Compress)
}

#[cfg(not(feature = "compression-zstd"))]
fn zstd_compress(_raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::CodecDisabled(Codec::Zstd))
}

#[cfg(feature = "compression-zstd")]
fn zstd_decompress(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::stream::decode_all(payload).map_err(|e| CodecError::Decompress(e.to_string()))
}

#[cfg(not(feature = "compression-zstd"))]
fn zstd_decompress(_payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::CodecDisabled(Codec::Zstd))
}

#[cfg(feature = "compression-lz4")]
fn lz4_compress(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    Ok(lz4_flex::compress_prepend_size(raw))
}

#[cfg(not(feature = "compression-lz4"))]
fn lz4_compress(_raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::CodecDisabled(Codec::Lz4))
}

#[cfg(feature = "compression-lz4")]
fn lz4_decompress(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    lz4_flex::decompress_size_prepended(payload).map_err(|e| CodecError::Decompress(e.to_string()))
}

#[cfg(not(feature = "compression-lz4"))]
fn lz4_decompress(_payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::CodecDisabled(Codec::Lz4))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u64]) -> BTreeSet<u64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_insert_contains() {
        let mut b = EdgeBitmap::new_zero(20).unwrap();
        b.insert(3);
        b.insert(19);
        b.insert(25);
        assert!(b.contains(3));
        assert!(b.contains(19));
        assert!(!b.contains(4));
        assert!(!b.contains(25));
        assert_eq!(b.count(), 2);
    }

    #[test]
    fn test_lsb_first_layout() {
        let b = EdgeBitmap::from_ids(&set(&[0, 9])).unwrap();
        assert_eq!(b.len(), 10);
        assert_eq!(b.as_bytes(), &[0b0000_0001, 0b0000_0010]);
    }

    #[test]
    fn test_empty_set() {
        let b = EdgeBitmap::from_ids(&BTreeSet::new()).unwrap();
        assert!(b.is_empty());
        assert!(b.as_bytes().is_empty());
        assert_eq!(b.ids().count(), 0);
    }

    #[test]
    fn test_ids_ascending() {
        let ids = set(&[64, 1, 7, 8, 200]);
        let b = EdgeBitmap::from_ids(&ids).unwrap();
        let out: Vec<u64> = b.ids().collect();
        assert_eq!(out, vec![1, 7, 8, 64, 200]);
    }

    #[test]
    fn test_envelope_header() {
        let packed = EdgeBitmap::from_ids(&set(&[1, 2, 3])).unwrap().pack(Codec::None).unwrap();
        assert_eq!(&packed[..4], b"EBM1");
        assert_eq!(packed[4], 0);
        assert_eq!(u64::from_le_bytes(packed[8..16].try_into().unwrap()), 4);
        assert_eq!(&packed[16..], &[0b0000_1110]);
    }

    #[test]
    fn test_unpack_masks_padding_bits() {
        let mut packed = EdgeBitmap::from_ids(&set(&[2])).unwrap().pack(Codec::None).unwrap();
        // len is 3 bits; garbage above it must not surface as ids
        packed[16] |= 0b1111_0000;
        assert_eq!(decode(&packed).unwrap(), set(&[2]));
    }

    #[test]
    fn test_default_codec_roundtrip() {
        let ids = set(&[1, 2, 3, 40_000]);
        let blob = encode(&ids, Codec::default()).unwrap();
        assert_eq!(decode(&blob).unwrap(), ids);
    }

    #[test]
    fn test_rejects_ids_past_limit() {
        let err = encode(&set(&[1, u64::MAX]), Codec::None).unwrap_err();
        assert!(matches!(err, CodecError::IdOutOfRange { id: u64::MAX, .. }));

        let err = EdgeBitmap::from_ids(&set(&[MAX_BIT_LEN])).unwrap_err();
        assert!(matches!(err, CodecError::IdOutOfRange { id, limit } if id == MAX_BIT_LEN && limit == MAX_BIT_LEN));
        assert!(EdgeBitmap::new_zero(MAX_BIT_LEN + 1).is_err());
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("ZSTD".parse::<Codec>().unwrap(), Codec::Zstd);
        assert_eq!("none".parse::<Codec>().unwrap(), Codec::None);
        assert!("gzip".parse::<Codec>().is_err());
    }
}
