use edgestash::bitmap::{decode, EdgeBitmap};
use edgestash::{Codec, CodecError};

fn make_envelope(codec: u8, bit_len: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + payload.len());
    out.extend_from_slice(b"EBM1");
    out.push(codec);
    out.push(0);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&bit_len.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[test]
fn unpack_rejects_truncated_header() {
    // The magic matches but the 16-byte header is incomplete.
    let err = EdgeBitmap::unpack(b"EBM1\x00\x00").unwrap_err();
    assert!(matches!(err, CodecError::Truncated(6)));
    assert!(err.to_string().contains("truncated bitmap envelope"));
}

#[test]
fn unpack_rejects_bad_magic() {
    let mut bytes = make_envelope(0, 0, b"");
    bytes[0] = b'X';
    let err = EdgeBitmap::unpack(&bytes).unwrap_err();
    assert!(matches!(err, CodecError::BadMagic));
}

#[test]
fn unpack_rejects_unknown_codec() {
    let bytes = make_envelope(99, 0, b"");
    let err = EdgeBitmap::unpack(&bytes).unwrap_err();
    assert!(err.to_string().contains("unknown bitmap compression codec 99"));
}

#[test]
fn unpack_rejects_size_mismatch_for_none_codec() {
    // 20 bits need 3 bytes, only 2 are present.
    let bytes = make_envelope(Codec::None as u8, 20, &[0xff, 0x01]);
    let err = EdgeBitmap::unpack(&bytes).unwrap_err();
    assert!(matches!(
        err,
        CodecError::SizeMismatch {
            expected: 3,
            actual: 2
        }
    ));
}

#[test]
fn unpack_rejects_oversized_length_before_decompressing() {
    let bytes = make_envelope(Codec::None as u8, u64::MAX, b"");
    let err = EdgeBitmap::unpack(&bytes).unwrap_err();
    assert!(matches!(err, CodecError::LengthOutOfRange(u64::MAX)));
}

#[test]
fn unpack_accepts_none_codec_when_sizes_match() {
    let bytes = make_envelope(Codec::None as u8, 12, &[0b0000_0110, 0b0000_1000]);
    let ids: Vec<u64> = decode(&bytes).unwrap().into_iter().collect();
    assert_eq!(ids, vec![1, 2, 11]);
}

#[test]
fn unpack_accepts_empty_bitmap() {
    let bytes = make_envelope(Codec::None as u8, 0, b"");
    let bitmap = EdgeBitmap::unpack(&bytes).unwrap();
    assert!(bitmap.is_empty());
    assert_eq!(bitmap.count(), 0);
}

#[cfg(feature = "compression-zstd")]
#[test]
fn unpack_reports_corrupt_zstd_payload() {
    let bytes = make_envelope(Codec::Zstd as u8, 8, b"definitely not zstd");
    let err = EdgeBitmap::unpack(&bytes).unwrap_err();
    assert!(matches!(err, CodecError::Decompress(_)));
}

#[cfg(not(feature = "compression-lz4"))]
#[test]
fn unpack_reports_disabled_codec() {
    let bytes = make_envelope(Codec::Lz4 as u8, 0, b"");
    let err = EdgeBitmap::unpack(&bytes).unwrap_err();
    assert!(matches!(err, CodecError::CodecDisabled(Codec::Lz4)));
}
