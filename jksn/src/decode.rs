use std::io::Read;

use jksn_base::{Error, ErrorKind, Result};
use tracing::trace;

use crate::hash::{djb8, ChecksumKind};
use crate::ioutil::{
    read_be_i16, read_be_i32, read_be_u16, read_be_u32, read_be_u64, read_exact_n, read_i8,
    read_u8, read_uvarint, HashingReader, PushbackReader,
};
use crate::json::parse_json_literal;
use crate::opcode::{
    family, hi, lo, ARRAY_MAX_INLINE, BLOB_DEDUP_REF, BLOB_MAX_INLINE, LEN_UINT16, LEN_UINT8,
    LEN_VARINT, MAGIC, MAP_MAX_INLINE, OPEN_ARRAY_SENTINEL_LOW, PRAGMA_LOW, REFRESH_CLEAR,
    REFRESH_MAX_INLINE, TEXT16_DEDUP_REF, TEXT16_MAX_INLINE, TEXT8_MAX_INLINE,
    TRANSPOSED_MAX_INLINE, TRANSPOSED_UNSPECIFIED,
};
use crate::options::DecodeOptions;
use crate::value::Value;

/// Mirrors the length-class encoding `crate::opcode::select_length_class`
/// chooses from, reading the out-of-line count (if any) that follows a
/// control byte whose low nibble names a length class.
fn read_length<R: Read>(src: &mut R, low: u8, max_inline: u8) -> Result<u64> {
    if low == LEN_UINT8 {
        Ok(read_u8(src)? as u64)
    } else if low == LEN_UINT16 {
        Ok(read_be_u16(src)? as u64)
    } else if low == LEN_VARINT {
        read_uvarint(src)
    } else if low <= max_inline {
        Ok(low as u64)
    } else {
        Err(Error::from(ErrorKind::UnknownOpcode {
            control: (low) | 0xF0,
        }))
    }
}

fn narrowed_int_value<R: Read>(src: &mut R, fam: u8, low: u8) -> Result<i64> {
    match low {
        0xD => Ok(read_i8(src)? as i64),
        0xC => Ok(read_be_i16(src)? as i64),
        0xB => Ok(read_be_i32(src)? as i64),
        0xF => Ok(read_uvarint(src)? as i64),
        0xE => {
            let magnitude = read_uvarint(src)?;
            i64::try_from(-(magnitude as i128))
                .map_err(|_| Error::from(ErrorKind::MalformedVarint))
        }
        other => Err(Error::from(ErrorKind::UnknownOpcode {
            control: (fam << 4) | other,
        })),
    }
}

/// Stream-local decoder state, mirroring the encoder's optimizer state: a
/// rolling last-seen absolute integer for delta decoding, and the two
/// 256-slot dedup caches shared across text origins (on the text side) and
/// keyed by the value itself so a later dedup-ref returns the same `Value`.
pub struct Decoder {
    last_int: Option<i64>,
    text_hash: Vec<Option<Value>>,
    blob_hash: Vec<Option<Value>>,
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder {
            last_int: None,
            text_hash: vec![None; 256],
            blob_hash: vec![None; 256],
        }
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8], opts: &DecodeOptions) -> Result<Value> {
        let mut cur = std::io::Cursor::new(bytes);
        self.decode_from(&mut cur, opts)
    }

    pub fn decode_from<R: Read>(&mut self, source: R, opts: &DecodeOptions) -> Result<Value> {
        let mut pb = PushbackReader::new(source);
        if opts.header {
            let probe = pb.read_up_to(MAGIC.len())?;
            if probe != MAGIC {
                pb.unread(&probe);
            }
        }
        self.decode_top_value(&mut pb)
    }

    /// Handles the opcodes that wrap or are themselves control flow rather
    /// than data: refreshers, integrity pragmas/checksums. Everything else is
    /// a single value, delegated to [`Self::decode_value_body`].
    fn decode_top_value<R: Read>(&mut self, src: &mut R) -> Result<Value> {
        loop {
            let control = read_u8(src)?;
            let fam = hi(control);
            let low = lo(control);

            if fam == family::REFRESH {
                if low == REFRESH_CLEAR {
                    trace!("clearing dedup hash tables");
                    self.text_hash = vec![None; 256];
                    self.blob_hash = vec![None; 256];
                    continue;
                }
                let count = read_length(src, low, REFRESH_MAX_INLINE)?;
                for _ in 0..count {
                    self.decode_top_value(src)?;
                }
                continue;
            }

            if fam == family::INTEGRITY {
                if low == PRAGMA_LOW {
                    self.decode_top_value(src)?;
                    continue;
                }
                if low <= 5 {
                    let kind = ChecksumKind::from_index(low)
                        .ok_or(Error::from(ErrorKind::UnknownOpcode { control }))?;
                    let mut expected = vec![0u8; kind.digest_len()];
                    src.read_exact(&mut expected).map_err(Error::from)?;
                    let mut hashing = HashingReader::new(src, kind.new_hasher());
                    let value = self.decode_value_body(&mut hashing)?;
                    let actual = hashing.into_digest();
                    if actual != expected {
                        return Err(Error::from(ErrorKind::ChecksumMismatch));
                    }
                    return Ok(value);
                }
                if (8..=13).contains(&low) {
                    let kind = ChecksumKind::from_index(low - 8)
                        .ok_or(Error::from(ErrorKind::UnknownOpcode { control }))?;
                    let mut hashing = HashingReader::new(src, kind.new_hasher());
                    let value = self.decode_value_body(&mut hashing)?;
                    let actual = hashing.into_digest();
                    let mut expected = vec![0u8; kind.digest_len()];
                    src.read_exact(&mut expected).map_err(Error::from)?;
                    if actual != expected {
                        return Err(Error::from(ErrorKind::ChecksumMismatch));
                    }
                    return Ok(value);
                }
                return Err(Error::from(ErrorKind::UnknownOpcode { control }));
            }

            return self.decode_value_body_with_control(src, control);
        }
    }

    fn decode_value_body<R: Read>(&mut self, src: &mut R) -> Result<Value> {
        let control = read_u8(src)?;
        self.decode_value_body_with_control(src, control)
    }

    fn decode_value_body_with_control<R: Read>(&mut self, src: &mut R, control: u8) -> Result<Value> {
        let fam = hi(control);
        let low = lo(control);
        match fam {
            family::SPECIAL => self.decode_special(src, low, control),
            family::ABS_INT => self.decode_abs_int(src, low),
            family::DELTA_INT => self.decode_delta_int(src, low),
            family::FLOAT => self.decode_float(src, low, control),
            family::TEXT16 => self.decode_text16(src, low),
            family::TEXT8 => self.decode_text8(src, low),
            family::BLOB => self.decode_blob(src, low),
            family::ARRAY => self.decode_array(src, low),
            family::MAP => self.decode_map(src, low),
            family::TRANSPOSED => self.decode_transposed(src, low),
            family::OPEN_ARRAY => self.decode_open_array(src, low, control),
            _ => Err(Error::from(ErrorKind::UnknownOpcode { control })),
        }
    }

    fn decode_special<R: Read>(&mut self, src: &mut R, low: u8, control: u8) -> Result<Value> {
        match low {
            0x0 | 0x1 => Ok(Value::Null),
            0x2 => Ok(Value::Bool(false)),
            0x3 => Ok(Value::Bool(true)),
            0xF => {
                let text = self.decode_value_body(src)?;
                let Value::Text(s) = text else {
                    return Err(Error::from(ErrorKind::JsonLiteralNotText));
                };
                parse_json_literal(&s)
            }
            _ => Err(Error::from(ErrorKind::UnknownOpcode { control })),
        }
    }

    fn decode_abs_int<R: Read>(&mut self, src: &mut R, low: u8) -> Result<Value> {
        let v = if (0..=10).contains(&low) {
            low as i64
        } else {
            narrowed_int_value(src, family::ABS_INT, low)?
        };
        self.last_int = Some(v);
        Ok(Value::Int(v))
    }

    fn decode_delta_int<R: Read>(&mut self, src: &mut R, low: u8) -> Result<Value> {
        let last = self
            .last_int
            .ok_or(Error::from(ErrorKind::DeltaWithoutPriorInt))?;
        let delta = if (0..=5).contains(&low) {
            low as i64
        } else if (6..=10).contains(&low) {
            low as i64 - 11
        } else {
            narrowed_int_value(src, family::DELTA_INT, low)?
        };
        let v = last + delta;
        self.last_int = Some(v);
        Ok(Value::Int(v))
    }

    fn decode_float<R: Read>(&mut self, src: &mut R, low: u8, control: u8) -> Result<Value> {
        match low {
            0x0 => Ok(Value::Float(f64::NAN)),
            0xB => Err(Error::from(ErrorKind::NotImplementedLongDouble)),
            0xC => Ok(Value::Float(f64::from_bits(read_be_u64(src)?))),
            0xD => Ok(Value::Float(f32::from_bits(read_be_u32(src)?) as f64)),
            0xE => Ok(Value::Float(f64::NEG_INFINITY)),
            0xF => Ok(Value::Float(f64::INFINITY)),
            _ => Err(Error::from(ErrorKind::UnknownOpcode { control })),
        }
    }

    fn decode_text16<R: Read>(&mut self, src: &mut R, low: u8) -> Result<Value> {
        if low == TEXT16_DEDUP_REF {
            let slot = read_u8(src)?;
            return self.text_hash[slot as usize]
                .clone()
                .ok_or(Error::from(ErrorKind::DedupRefEmptySlot { slot }));
        }
        let n_units = read_length(src, low, TEXT16_MAX_INLINE)?;
        let mut units = Vec::with_capacity(n_units as usize);
        let mut raw = Vec::with_capacity(n_units as usize * 2);
        for _ in 0..n_units {
            let mut pair = [0u8; 2];
            src.read_exact(&mut pair).map_err(Error::from)?;
            raw.extend_from_slice(&pair);
            units.push(u16::from_le_bytes(pair));
        }
        let s = String::from_utf16(&units).map_err(|_| Error::from(ErrorKind::InvalidUtf16))?;
        self.remember_text(&raw, &s);
        Ok(Value::Text(s))
    }

    fn decode_text8<R: Read>(&mut self, src: &mut R, low: u8) -> Result<Value> {
        let n = read_length(src, low, TEXT8_MAX_INLINE)?;
        let raw = read_exact_n(src, n as usize)?;
        let s = String::from_utf8(raw.clone()).map_err(|_| Error::from(ErrorKind::InvalidUtf8))?;
        self.remember_text(&raw, &s);
        Ok(Value::Text(s))
    }

    fn remember_text(&mut self, raw: &[u8], s: &str) {
        if raw.len() > 1 {
            let slot = djb8(raw) as usize;
            self.text_hash[slot] = Some(Value::Text(s.to_owned()));
        }
    }

    fn decode_blob<R: Read>(&mut self, src: &mut R, low: u8) -> Result<Value> {
        if low == BLOB_DEDUP_REF {
            let slot = read_u8(src)?;
            return self.blob_hash[slot as usize]
                .clone()
                .ok_or(Error::from(ErrorKind::DedupRefEmptySlot { slot }));
        }
        let n = read_length(src, low, BLOB_MAX_INLINE)?;
        let raw = read_exact_n(src, n as usize)?;
        if raw.len() > 1 {
            let slot = djb8(&raw) as usize;
            self.blob_hash[slot] = Some(Value::Blob(raw.clone()));
        }
        Ok(Value::Blob(raw))
    }

    fn decode_array<R: Read>(&mut self, src: &mut R, low: u8) -> Result<Value> {
        let n = read_length(src, low, ARRAY_MAX_INLINE)?;
        let mut items = Vec::with_capacity(n as usize);
        for _ in 0..n {
            items.push(self.decode_top_value(src)?);
        }
        Ok(Value::Array(items))
    }

    fn decode_map<R: Read>(&mut self, src: &mut R, low: u8) -> Result<Value> {
        let n = read_length(src, low, MAP_MAX_INLINE)?;
        let mut pairs = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let k = self.decode_top_value(src)?;
            let v = self.decode_top_value(src)?;
            pairs.push((k, v));
        }
        Ok(Value::Map(pairs))
    }

    fn collapse_duplicates(pairs: Vec<(Value, Value)>) -> Vec<(Value, Value)> {
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            if let Some(existing) = out.iter_mut().find(|(ek, _)| *ek == k) {
                existing.1 = v;
            } else {
                out.push((k, v));
            }
        }
        out
    }

    fn decode_transposed<R: Read>(&mut self, src: &mut R, low: u8) -> Result<Value> {
        if low == TRANSPOSED_UNSPECIFIED {
            return Ok(Value::Unspecified);
        }
        let n_cols = read_length(src, low, TRANSPOSED_MAX_INLINE)?;
        let mut keys = Vec::with_capacity(n_cols as usize);
        let mut columns: Vec<Vec<Value>> = Vec::with_capacity(n_cols as usize);
        for _ in 0..n_cols {
            let key = self.decode_top_value(src)?;
            let col_value = self.decode_top_value(src)?;
            let Value::Array(col) = col_value else {
                return Err(Error::from(ErrorKind::TransposedColumnNotArray));
            };
            keys.push(key);
            columns.push(col);
        }
        let n_rows = columns.iter().map(|c| c.len()).max().unwrap_or(0);
        let mut rows = Vec::with_capacity(n_rows);
        for row_idx in 0..n_rows {
            let mut pairs = Vec::with_capacity(keys.len());
            for (key, col) in keys.iter().zip(columns.iter()) {
                let cell = col.get(row_idx).cloned().unwrap_or(Value::Unspecified);
                if !cell.is_unspecified() {
                    pairs.push((key.clone(), cell));
                }
            }
            rows.push(Value::Map(pairs));
        }
        Ok(Value::Array(rows))
    }

    fn decode_open_array<R: Read>(&mut self, src: &mut R, low: u8, control: u8) -> Result<Value> {
        if low != OPEN_ARRAY_SENTINEL_LOW {
            return Err(Error::from(ErrorKind::UnknownOpcode { control }));
        }
        let mut items = Vec::new();
        loop {
            let item = self.decode_top_value(src)?;
            if item.is_unspecified() {
                break;
            }
            items.push(item);
        }
        Ok(Value::Array(items))
    }
}

fn postprocess_map(v: Value, ordered_map: bool) -> Value {
    match v {
        Value::Map(pairs) => {
            let pairs = pairs
                .into_iter()
                .map(|(k, v)| (postprocess_map(k, ordered_map), postprocess_map(v, ordered_map)))
                .collect();
            Value::Map(if ordered_map {
                pairs
            } else {
                Decoder::collapse_duplicates(pairs)
            })
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| postprocess_map(item, ordered_map))
                .collect(),
        ),
        other => other,
    }
}

/// One-shot decode with a fresh, stateless [`Decoder`].
pub fn decode(bytes: &[u8], opts: &DecodeOptions) -> Result<Value> {
    let value = Decoder::new().decode(bytes, opts)?;
    Ok(postprocess_map(value, opts.ordered_map))
}

/// One-shot decode from a reader, with a fresh, stateless [`Decoder`].
pub fn decode_from<R: Read>(source: R, opts: &DecodeOptions) -> Result<Value> {
    let value = Decoder::new().decode_from(source, opts)?;
    Ok(postprocess_map(value, opts.ordered_map))
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_decode_null_bool() {
        let opts = DecodeOptions {
            header: false,
            ..Default::default()
        };
        assert_eq!(decode(&[0x01], &opts).unwrap(), Value::Null);
        assert_eq!(decode(&[0x02], &opts).unwrap(), Value::Bool(false));
        assert_eq!(decode(&[0x03], &opts).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_decode_inline_int() {
        let opts = DecodeOptions {
            header: false,
            ..Default::default()
        };
        assert_eq!(decode(&[0x17], &opts).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_decode_with_header() {
        let opts = DecodeOptions::default();
        let mut bytes = MAGIC.to_vec();
        bytes.push(0x01);
        assert_eq!(decode(&bytes, &opts).unwrap(), Value::Null);
    }

    #[test]
    fn test_roundtrip_array_of_strings() {
        use crate::encode::encode;
        use crate::options::EncodeOptions;

        let v = Value::Array(vec![
            Value::Text("hello".into()),
            Value::Int(42),
            Value::Bool(true),
            Value::Null,
        ]);
        let enc_opts = EncodeOptions {
            header: false,
            ..Default::default()
        };
        let dec_opts = DecodeOptions {
            header: false,
            ..Default::default()
        };
        let bytes = encode(&v, &enc_opts).unwrap();
        assert_eq!(decode(&bytes, &dec_opts).unwrap(), v);
    }

    #[test]
    fn test_roundtrip_transposed_map_array() {
        use crate::encode::encode;
        use crate::options::EncodeOptions;

        let row = |a: i64, b: &str| {
            Value::Map(vec![
                (Value::Text("a".into()), Value::Int(a)),
                (Value::Text("b".into()), Value::Text(b.into())),
            ])
        };
        let v = Value::Array(vec![row(1, "x"), row(2, "y"), row(3, "z")]);
        let enc_opts = EncodeOptions {
            header: false,
            ..Default::default()
        };
        let dec_opts = DecodeOptions {
            header: false,
            ..Default::default()
        };
        let bytes = encode(&v, &enc_opts).unwrap();
        assert_eq!(decode(&bytes, &dec_opts).unwrap(), v);
    }

    #[test]
    fn test_ordered_map_false_collapses_duplicates() {
        let pairs = vec![
            (Value::Text("a".into()), Value::Int(1)),
            (Value::Text("a".into()), Value::Int(2)),
        ];
        let collapsed = Decoder::collapse_duplicates(pairs);
        assert_eq!(collapsed, vec![(Value::Text("a".into()), Value::Int(2))]);
    }
}
