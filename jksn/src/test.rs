//! Scenario-driven integration tests that cross module boundaries: literal
//! wire-byte assertions for the opt-in encode entry points (checksum wrapping,
//! open arrays, refreshers, pragmas) that no single per-file unit test module
//! is positioned to cover end to end.

use test_log::test;

use crate::decode::decode;
use crate::encode::{encode, Encoder};
use crate::hash::ChecksumKind;
use crate::opcode::{ctrl, family};
use crate::options::{DecodeOptions, EncodeOptions};
use crate::value::Value;

fn no_header() -> EncodeOptions {
    EncodeOptions {
        header: false,
        ..Default::default()
    }
}

fn no_header_decode() -> DecodeOptions {
    DecodeOptions {
        header: false,
        ..Default::default()
    }
}

#[test]
fn test_narrowed_int16_literal_bytes() {
    let bytes = encode(&Value::Int(255), &no_header()).unwrap();
    assert_eq!(bytes, vec![0x1C, 0x00, 0xFF]);
}

#[test]
fn test_narrowed_int32_literal_bytes() {
    let bytes = encode(&Value::Int(1 << 21), &no_header()).unwrap();
    assert_eq!(bytes, vec![0x1B, 0x00, 0x20, 0x00, 0x00]);
}

#[test]
fn test_transposed_array_literal_control_byte() {
    let rows = Value::Array(vec![
        Value::Map(vec![
            (Value::Text("a".into()), Value::Int(1)),
            (Value::Text("b".into()), Value::Int(2)),
        ]),
        Value::Map(vec![(Value::Text("a".into()), Value::Int(3))]),
    ]);
    let bytes = encode(&rows, &no_header()).unwrap();
    assert_eq!(bytes[0], 0xA2);
    assert_eq!(decode(&bytes, &no_header_decode()).unwrap(), rows);
}

#[test]
fn test_prefix_checksum_crc32_literal_shape() {
    let bytes =
        Encoder::new().encode_with_prefix_checksum(&Value::Null, ChecksumKind::Crc32, &no_header()).unwrap();
    // control byte, 4-byte CRC32 digest, then the single-byte Null payload.
    assert_eq!(bytes[0], 0xF1);
    assert_eq!(bytes.len(), 1 + 4 + 1);
    assert_eq!(bytes[5], 0x01);
    assert_eq!(decode(&bytes, &no_header_decode()).unwrap(), Value::Null);
}

#[test]
fn test_checksum_roundtrip_every_algorithm_prefix_and_suffix() {
    let kinds = [
        ChecksumKind::Djb8,
        ChecksumKind::Crc32,
        ChecksumKind::Md5,
        ChecksumKind::Sha1,
        ChecksumKind::Sha256,
        ChecksumKind::Sha512,
    ];
    let value = Value::Array(vec![Value::Text("checked".into()), Value::Int(-7)]);
    for kind in kinds {
        let prefixed = Encoder::new()
            .encode_with_prefix_checksum(&value, kind, &no_header())
            .unwrap();
        assert_eq!(decode(&prefixed, &no_header_decode()).unwrap(), value);

        let suffixed = Encoder::new()
            .encode_with_suffix_checksum(&value, kind, &no_header())
            .unwrap();
        assert_eq!(decode(&suffixed, &no_header_decode()).unwrap(), value);
    }
}

#[test]
fn test_checksum_mutation_is_detected() {
    let mut bytes = Encoder::new()
        .encode_with_prefix_checksum(&Value::Int(42), ChecksumKind::Crc32, &no_header())
        .unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    assert!(decode(&bytes, &no_header_decode()).is_err());
}

#[test]
fn test_open_array_literal_shape_and_roundtrip() {
    let items = vec![Value::Int(1), Value::Text("x".into())];
    let bytes = Encoder::new().encode_open_array(&items, &no_header()).unwrap();
    assert_eq!(bytes[0], ctrl(family::OPEN_ARRAY, 0x8));
    assert_eq!(*bytes.last().unwrap(), ctrl(family::TRANSPOSED, 0x0));
    assert_eq!(decode(&bytes, &no_header_decode()).unwrap(), Value::Array(items));
}

#[test]
fn test_pragma_discards_ignored_value() {
    let ignored = Value::Int(999);
    let real = Value::Text("kept".into());
    let bytes = Encoder::new()
        .encode_pragma_and_value(&ignored, &real, &no_header())
        .unwrap();
    assert_eq!(bytes[0], 0xFF);
    assert_eq!(decode(&bytes, &no_header_decode()).unwrap(), real);
}

#[test]
fn test_refresh_primes_dedup_without_appearing_in_result() {
    let opts = no_header();
    let mut enc = Encoder::new();
    let text = Value::Text("primed text worth deduping".to_owned());

    let mut stream = enc.encode_refresh(std::slice::from_ref(&text), &opts).unwrap();
    stream.extend(enc.encode(&text, &opts).unwrap());

    // the dummy's full encoding plus the second, now-deduped reference.
    assert_eq!(
        decode(&stream, &no_header_decode()).unwrap(),
        text,
        "the refresher's dummy value is consumed for state, not returned"
    );

    // confirm the tail the refresher left behind really is a dedup reference:
    // drop the refresher's own bytes and decode just the remainder on its own
    // would fail (no prior hash table), so inspect shape instead.
    let mut fresh = Encoder::new();
    let first = fresh.encode(&text, &opts).unwrap();
    assert!(stream.len() < first.len() * 2);
}

#[test]
fn test_clear_hash_tables_clears_dedup_but_not_last_int() {
    let opts = no_header();
    let mut enc = Encoder::new();
    let text = Value::Text("cleared between occurrences".to_owned());

    let _first = enc.encode(&text, &opts).unwrap();
    let deduped = enc.encode(&text, &opts).unwrap();
    assert_eq!(deduped.len(), 2, "second occurrence should already be a dedup ref");

    let _clear = enc.encode_clear_hash_tables();
    let after_clear = enc.encode(&text, &opts).unwrap();
    assert!(after_clear.len() > 2, "clearing hash tables should defeat the dedup ref");

    let mut int_enc = Encoder::new();
    let _ = int_enc.encode(&Value::Int(1_000_000), &opts).unwrap();
    let _clear = int_enc.encode_clear_hash_tables();
    let delta = int_enc.encode(&Value::Int(1_000_001), &opts).unwrap();
    assert_eq!(
        delta,
        vec![ctrl(family::DELTA_INT, 1)],
        "clearing hash tables must not reset the rolling last-int"
    );
}

#[test]
fn test_json_literal_opcode_decodes_embedded_document() {
    let json_text = Value::Text(r#"{"a":1}"#.to_owned());
    let mut bytes = vec![ctrl(family::SPECIAL, 0xF)];
    bytes.extend(encode(&json_text, &no_header()).unwrap());
    let decoded = decode(&bytes, &no_header_decode()).unwrap();
    assert_eq!(
        decoded,
        Value::Map(vec![(Value::Text("a".into()), Value::Int(1))])
    );
}
