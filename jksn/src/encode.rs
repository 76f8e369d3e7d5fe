use std::io::Write;

use jksn_base::{Error, ErrorKind, Result};
use tracing::{debug, trace};

use crate::hash::{djb8, ChecksumKind};
use crate::ioutil::varint_bytes;
use crate::node::Node;
use crate::opcode::{
    ctrl, family, select_length_class, LengthClass, ARRAY_MAX_INLINE, BLOB_DEDUP_REF,
    BLOB_MAX_INLINE, MAGIC, MAP_MAX_INLINE, OPEN_ARRAY_SENTINEL_LOW, PRAGMA_LOW, REFRESH_CLEAR,
    REFRESH_MAX_INLINE, TEXT16_DEDUP_REF, TEXT16_MAX_INLINE, TEXT8_MAX_INLINE,
    TRANSPOSED_MAX_INLINE, TRANSPOSED_UNSPECIFIED,
};
use crate::options::EncodeOptions;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntForm {
    Int8,
    Int16,
    Int32,
    Varint,
}

/// Smallest of {int8, int16, int32, varint} whose range covers `v`, with int32
/// only preferred over varint once the magnitude exceeds 2^21; below that,
/// varint is never worse and is sometimes smaller.
fn choose_int_form(v: i64) -> IntForm {
    if i8::try_from(v).is_ok() {
        IntForm::Int8
    } else if i16::try_from(v).is_ok() {
        IntForm::Int16
    } else if (-(1i64 << 31)..-(1i64 << 21)).contains(&v) || ((1i64 << 21)..(1i64 << 31)).contains(&v)
    {
        IntForm::Int32
    } else {
        IntForm::Varint
    }
}

fn narrowed_int_bytes(v: i64) -> (u8, Vec<u8>) {
    match choose_int_form(v) {
        IntForm::Int8 => (0xD, (v as i8).to_be_bytes().to_vec()),
        IntForm::Int16 => (0xC, (v as i16).to_be_bytes().to_vec()),
        IntForm::Int32 => (0xB, (v as i32).to_be_bytes().to_vec()),
        IntForm::Varint => {
            if v >= 0 {
                (0xF, varint_bytes(v as u64))
            } else {
                (0xE, varint_bytes(v.unsigned_abs()))
            }
        }
    }
}

fn build_abs_int_node(v: i64) -> Node {
    let mut node = if (0..=10).contains(&v) {
        Node::leaf(ctrl(family::ABS_INT, v as u8))
    } else {
        let (low, payload) = narrowed_int_bytes(v);
        Node::with_payload(ctrl(family::ABS_INT, low), payload)
    };
    node.origin = Some(v);
    node
}

fn build_delta_int_node(delta: i64) -> Node {
    if (0..=5).contains(&delta) {
        return Node::leaf(ctrl(family::DELTA_INT, delta as u8));
    }
    if (-5..=-1).contains(&delta) {
        return Node::leaf(ctrl(family::DELTA_INT, (delta + 11) as u8));
    }
    let (low, payload) = narrowed_int_bytes(delta);
    Node::with_payload(ctrl(family::DELTA_INT, low), payload)
}

fn build_float_node(f: f64) -> Node {
    if f.is_nan() {
        Node::leaf(ctrl(family::FLOAT, 0x0))
    } else if f.is_infinite() {
        Node::leaf(ctrl(family::FLOAT, if f > 0.0 { 0xF } else { 0xE }))
    } else {
        Node::with_payload(ctrl(family::FLOAT, 0xC), f.to_bits().to_be_bytes().to_vec())
    }
}

fn length_field_bytes(lc: LengthClass, n: u64) -> Vec<u8> {
    match lc {
        LengthClass::Inline(_) => Vec::new(),
        LengthClass::Uint8 => vec![n as u8],
        LengthClass::Uint16 => (n as u16).to_be_bytes().to_vec(),
        LengthClass::Varint => varint_bytes(n),
    }
}

/// Picks between a UTF-16LE and a UTF-8 rendering of `s` (ties favor UTF-8),
/// then narrows the resulting unit count to a length class.
fn build_text_node(s: &str) -> Node {
    let utf8_bytes = s.as_bytes().to_vec();
    let utf16_bytes: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let use_utf8 = utf8_bytes.len() <= utf16_bytes.len();
    let (fam, max_inline, payload, n) = if use_utf8 {
        let n = utf8_bytes.len() as u64;
        (family::TEXT8, TEXT8_MAX_INLINE, utf8_bytes, n)
    } else {
        let n = (utf16_bytes.len() / 2) as u64;
        (family::TEXT16, TEXT16_MAX_INLINE, utf16_bytes, n)
    };
    let lc = select_length_class(n, max_inline);
    let mut node = Node::with_payload(ctrl(fam, lc.low_nibble()), payload);
    node.length_field = length_field_bytes(lc, n);
    node.hash = Some(djb8(&node.payload));
    node
}

fn build_blob_node(b: &[u8]) -> Node {
    let n = b.len() as u64;
    let lc = select_length_class(n, BLOB_MAX_INLINE);
    let mut node = Node::with_payload(ctrl(family::BLOB, lc.low_nibble()), b.to_vec());
    node.length_field = length_field_bytes(lc, n);
    node.hash = Some(djb8(&node.payload));
    node
}

/// Stream-local optimizer state plus the public encode API.
///
/// A fresh `Encoder` starts with no prior integer and empty dedup caches; state
/// accumulates across successive calls on the same instance, mirroring the
/// stateful optimizer a single decoder instance would track on the way back.
pub struct Encoder {
    last_int: Option<i64>,
    text_hash: Vec<Option<Vec<u8>>>,
    blob_hash: Vec<Option<Vec<u8>>>,
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder {
            last_int: None,
            text_hash: vec![None; 256],
            blob_hash: vec![None; 256],
        }
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, value: &Value, opts: &EncodeOptions) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_to(value, &mut buf, opts)?;
        Ok(buf)
    }

    pub fn encode_to(&mut self, value: &Value, sink: &mut impl Write, opts: &EncodeOptions) -> Result<()> {
        let mut node = self.build_node(value, opts, 0)?;
        self.optimize(&mut node);
        if opts.header {
            sink.write_all(&MAGIC).map_err(Error::from)?;
        }
        node.write_to(sink)
    }

    /// Emits a lengthless array: items followed by the `Unspecified` sentinel
    /// as terminator, with no count ever written.
    pub fn encode_open_array(&mut self, items: &[Value], opts: &EncodeOptions) -> Result<Vec<u8>> {
        let mut buf = if opts.header { MAGIC.to_vec() } else { Vec::new() };
        buf.push(ctrl(family::OPEN_ARRAY, OPEN_ARRAY_SENTINEL_LOW));
        for item in items {
            let mut node = self.build_node(item, opts, 0)?;
            self.optimize(&mut node);
            node.write_to(&mut buf)?;
        }
        let mut term = self.build_node(&Value::Unspecified, opts, 0)?;
        self.optimize(&mut term);
        term.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Emits the standalone "clear tables" refresher (control byte `0x70`),
    /// clearing this encoder's own dedup caches so it stays in sync with a
    /// decoder observing the same byte.
    pub fn encode_clear_hash_tables(&mut self) -> Vec<u8> {
        self.text_hash = vec![None; 256];
        self.blob_hash = vec![None; 256];
        vec![ctrl(family::REFRESH, REFRESH_CLEAR)]
    }

    /// Emits a refresher that primes the dedup/delta state with `dummy_values`
    /// without those values appearing in the decoded result: the following
    /// value in the stream is read separately.
    pub fn encode_refresh(&mut self, dummy_values: &[Value], opts: &EncodeOptions) -> Result<Vec<u8>> {
        let mut buf = if opts.header { MAGIC.to_vec() } else { Vec::new() };
        if dummy_values.is_empty() {
            // Low nibble 0 is reserved for the clear-tables opcode, so a
            // zero-count refresh has no non-ambiguous direct encoding; priming
            // with nothing is already a no-op, so just emit no bytes for it.
            return Ok(buf);
        }
        let mut children = Vec::with_capacity(dummy_values.len());
        for v in dummy_values {
            let mut node = self.build_node(v, opts, 0)?;
            self.optimize(&mut node);
            children.push(node);
        }
        let lc = select_length_class(dummy_values.len() as u64, REFRESH_MAX_INLINE);
        let node = Node {
            control: ctrl(family::REFRESH, lc.low_nibble()),
            length_field: length_field_bytes(lc, dummy_values.len() as u64),
            children,
            ..Node::leaf(0)
        };
        node.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Emits a pragma byte, an ignored value, and the real value that follows
    /// it: decoding this stream discards `ignored` and returns `real`.
    pub fn encode_pragma_and_value(
        &mut self,
        ignored: &Value,
        real: &Value,
        opts: &EncodeOptions,
    ) -> Result<Vec<u8>> {
        let mut buf = if opts.header { MAGIC.to_vec() } else { Vec::new() };
        buf.push(ctrl(family::INTEGRITY, PRAGMA_LOW));
        let mut ignored_node = self.build_node(ignored, opts, 0)?;
        self.optimize(&mut ignored_node);
        ignored_node.write_to(&mut buf)?;
        let mut real_node = self.build_node(real, opts, 0)?;
        self.optimize(&mut real_node);
        real_node.write_to(&mut buf)?;
        Ok(buf)
    }

    pub fn encode_with_prefix_checksum(
        &mut self,
        value: &Value,
        kind: ChecksumKind,
        opts: &EncodeOptions,
    ) -> Result<Vec<u8>> {
        let mut inner = self.build_node(value, opts, 0)?;
        self.optimize(&mut inner);
        let inner_bytes = inner.linearize()?;
        let mut hasher = kind.new_hasher();
        hasher.update(&inner_bytes);
        let digest = hasher.digest();
        let mut buf = if opts.header { MAGIC.to_vec() } else { Vec::new() };
        buf.push(kind.prefix_control());
        buf.extend_from_slice(&digest);
        buf.extend_from_slice(&inner_bytes);
        Ok(buf)
    }

    pub fn encode_with_suffix_checksum(
        &mut self,
        value: &Value,
        kind: ChecksumKind,
        opts: &EncodeOptions,
    ) -> Result<Vec<u8>> {
        let mut inner = self.build_node(value, opts, 0)?;
        self.optimize(&mut inner);
        let inner_bytes = inner.linearize()?;
        let mut hasher = kind.new_hasher();
        hasher.update(&inner_bytes);
        let digest = hasher.digest();
        let mut buf = if opts.header { MAGIC.to_vec() } else { Vec::new() };
        buf.push(kind.suffix_control());
        buf.extend_from_slice(&inner_bytes);
        buf.extend_from_slice(&digest);
        Ok(buf)
    }

    fn build_node(&mut self, value: &Value, opts: &EncodeOptions, depth: usize) -> Result<Node> {
        if opts.check_circular && depth > opts.max_depth {
            return Err(Error::from(ErrorKind::MaxDepthExceeded {
                max_depth: opts.max_depth,
            }));
        }
        match value {
            Value::Null => Ok(Node::leaf(ctrl(family::SPECIAL, 0x1))),
            Value::Bool(false) => Ok(Node::leaf(ctrl(family::SPECIAL, 0x2))),
            Value::Bool(true) => Ok(Node::leaf(ctrl(family::SPECIAL, 0x3))),
            Value::Int(i) => Ok(build_abs_int_node(*i)),
            Value::Float(f) => Ok(build_float_node(*f)),
            Value::Text(s) => Ok(build_text_node(s)),
            Value::Blob(b) => Ok(build_blob_node(b)),
            Value::Array(items) => self.build_array_node(items, opts, depth),
            Value::Map(pairs) => self.build_map_node(pairs, opts, depth),
            Value::Unspecified => Ok(Node::leaf(ctrl(family::TRANSPOSED, TRANSPOSED_UNSPECIFIED))),
        }
    }

    fn build_array_node(&mut self, items: &[Value], opts: &EncodeOptions, depth: usize) -> Result<Node> {
        let mut children = Vec::with_capacity(items.len());
        for item in items {
            children.push(self.build_node(item, opts, depth + 1)?);
        }
        let lc = select_length_class(items.len() as u64, ARRAY_MAX_INLINE);
        let straight = Node {
            control: ctrl(family::ARRAY, lc.low_nibble()),
            length_field: length_field_bytes(lc, items.len() as u64),
            children,
            ..Node::leaf(0)
        };

        let all_maps = !items.is_empty() && items.iter().all(|v| matches!(v, Value::Map(_)));
        let any_nonempty = items
            .iter()
            .any(|v| matches!(v, Value::Map(m) if !m.is_empty()));
        if all_maps && any_nonempty {
            if let Some(transposed) = self.build_transposed_candidate(items, opts, depth)? {
                if transposed.depth3_size() < straight.depth3_size() {
                    debug!(
                        straight = straight.depth3_size(),
                        transposed = transposed.depth3_size(),
                        "adopting transposed array encoding"
                    );
                    return Ok(transposed);
                }
            }
        }
        Ok(straight)
    }

    fn build_transposed_candidate(
        &mut self,
        items: &[Value],
        opts: &EncodeOptions,
        depth: usize,
    ) -> Result<Option<Node>> {
        let mut keys: Vec<Value> = Vec::new();
        let mut columns: Vec<Vec<Value>> = Vec::new();
        for (row_idx, row) in items.iter().enumerate() {
            let Value::Map(pairs) = row else {
                unreachable!("caller only calls this once every row is a Map");
            };
            for (k, v) in pairs {
                let col_idx = match keys.iter().position(|existing| existing == k) {
                    Some(i) => i,
                    None => {
                        keys.push(k.clone());
                        columns.push(vec![Value::Unspecified; items.len()]);
                        keys.len() - 1
                    }
                };
                columns[col_idx][row_idx] = v.clone();
            }
        }
        if keys.is_empty() {
            return Ok(None);
        }

        let n_cols = keys.len();
        let lc = select_length_class(n_cols as u64, TRANSPOSED_MAX_INLINE);
        let mut children = Vec::with_capacity(n_cols * 2);
        for (key, col) in keys.into_iter().zip(columns.into_iter()) {
            children.push(self.build_node(&key, opts, depth + 1)?);
            children.push(self.build_node(&Value::Array(col), opts, depth + 1)?);
        }
        Ok(Some(Node {
            control: ctrl(family::TRANSPOSED, lc.low_nibble()),
            length_field: length_field_bytes(lc, n_cols as u64),
            children,
            ..Node::leaf(0)
        }))
    }

    fn build_map_node(&mut self, pairs: &[(Value, Value)], opts: &EncodeOptions, depth: usize) -> Result<Node> {
        let lc = select_length_class(pairs.len() as u64, MAP_MAX_INLINE);
        let mut children = Vec::with_capacity(pairs.len() * 2);
        for (k, v) in pairs {
            children.push(self.build_node(k, opts, depth + 1)?);
            children.push(self.build_node(v, opts, depth + 1)?);
        }
        Ok(Node {
            control: ctrl(family::MAP, lc.low_nibble()),
            length_field: length_field_bytes(lc, pairs.len() as u64),
            children,
            ..Node::leaf(0)
        })
    }

    /// Walks the tree in the same order it will be linearized, rewriting
    /// absolute-integer and text/blob leaves in place when doing so shrinks
    /// them, and updating the stream-local state every such leaf depends on.
    fn optimize(&mut self, node: &mut Node) {
        let fam = crate::opcode::hi(node.control);
        if fam == family::ABS_INT {
            if let Some(value) = node.origin {
                self.maybe_rewrite_as_delta(node, value);
                self.last_int = Some(value);
            }
            return;
        }
        if (fam == family::TEXT16 || fam == family::TEXT8 || fam == family::BLOB) && node.children.is_empty() {
            if let Some(hash) = node.hash {
                if node.payload.len() > 1 {
                    self.maybe_rewrite_as_dedup(node, hash, fam);
                }
            }
            return;
        }
        for child in &mut node.children {
            self.optimize(child);
        }
    }

    fn maybe_rewrite_as_delta(&mut self, node: &mut Node, value: i64) {
        let Some(last) = self.last_int else {
            return;
        };
        let delta_wide = value as i128 - last as i128;
        if delta_wide.abs() >= (value as i128).abs() {
            return;
        }
        let Ok(delta) = i64::try_from(delta_wide) else {
            return;
        };
        let candidate = build_delta_int_node(delta);
        if candidate.wire_len() < node.wire_len() {
            trace!(
                delta,
                saved = node.wire_len() as i64 - candidate.wire_len() as i64,
                "delta-int rewrite adopted"
            );
            node.control = candidate.control;
            node.length_field = candidate.length_field;
            node.payload = candidate.payload;
        }
    }

    fn maybe_rewrite_as_dedup(&mut self, node: &mut Node, hash: u8, fam: u8) {
        let slot = hash as usize;
        let table = if fam == family::BLOB {
            &mut self.blob_hash
        } else {
            &mut self.text_hash
        };
        if table[slot].as_deref() == Some(node.payload.as_slice()) {
            trace!(slot, family = fam, "dedup hit");
            let dedup_control = if fam == family::BLOB {
                ctrl(family::BLOB, BLOB_DEDUP_REF)
            } else {
                ctrl(family::TEXT16, TEXT16_DEDUP_REF)
            };
            node.control = dedup_control;
            node.length_field = vec![hash];
            node.payload = Vec::new();
        } else {
            table[slot] = Some(node.payload.clone());
        }
    }
}

/// One-shot encode with a fresh, stateless [`Encoder`].
pub fn encode(value: &Value, opts: &EncodeOptions) -> Result<Vec<u8>> {
    Encoder::new().encode(value, opts)
}

/// One-shot encode directly into a sink, with a fresh, stateless [`Encoder`].
pub fn encode_to(value: &Value, sink: &mut impl Write, opts: &EncodeOptions) -> Result<()> {
    Encoder::new().encode_to(value, sink, opts)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_choose_int_form_boundaries() {
        assert_eq!(choose_int_form(127), IntForm::Int8);
        assert_eq!(choose_int_form(128), IntForm::Int16);
        assert_eq!(choose_int_form(32767), IntForm::Int16);
        assert_eq!(choose_int_form(32768), IntForm::Varint);
        assert_eq!(choose_int_form(1 << 21), IntForm::Int32);
        assert_eq!(choose_int_form((1 << 21) - 1), IntForm::Varint);
        assert_eq!(choose_int_form((1i64 << 31) - 1), IntForm::Int32);
    }

    #[test]
    fn test_inline_int_node() {
        let n = build_abs_int_node(7);
        assert_eq!(n.control, ctrl(family::ABS_INT, 7));
        assert!(n.payload.is_empty());
    }

    #[test]
    fn test_encode_null_bool() {
        let mut enc = Encoder::new();
        let opts = EncodeOptions {
            header: false,
            ..Default::default()
        };
        assert_eq!(enc.encode(&Value::Null, &opts).unwrap(), vec![0x01]);
        assert_eq!(enc.encode(&Value::Bool(true), &opts).unwrap(), vec![0x03]);
        assert_eq!(enc.encode(&Value::Bool(false), &opts).unwrap(), vec![0x02]);
    }

    #[test]
    fn test_encode_with_header() {
        let mut enc = Encoder::new();
        let opts = EncodeOptions::default();
        let bytes = enc.encode(&Value::Null, &opts).unwrap();
        assert_eq!(&bytes[..3], b"jk!");
        assert_eq!(bytes[3], 0x01);
    }

    #[test]
    fn test_delta_rewrite_shrinks_repeated_large_ints() {
        let mut enc = Encoder::new();
        let opts = EncodeOptions {
            header: false,
            ..Default::default()
        };
        let first = enc.encode(&Value::Int(1_000_000), &opts).unwrap();
        let second = enc.encode(&Value::Int(1_000_001), &opts).unwrap();
        assert!(first.len() > 1);
        assert_eq!(second, vec![ctrl(family::DELTA_INT, 1)]);
    }

    #[test]
    fn test_text_dedup_second_occurrence() {
        let mut enc = Encoder::new();
        let opts = EncodeOptions {
            header: false,
            ..Default::default()
        };
        let s = Value::Text("a repeated string worth deduping".to_owned());
        let first = enc.encode(&s, &opts).unwrap();
        let second = enc.encode(&s, &opts).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(crate::opcode::hi(second[0]), family::TEXT16);
        assert_eq!(crate::opcode::lo(second[0]), TEXT16_DEDUP_REF);
        assert!(first.len() > 2);
    }

    #[test]
    fn test_max_depth_guard() {
        let mut v = Value::Array(vec![]);
        for _ in 0..10 {
            v = Value::Array(vec![v]);
        }
        let mut enc = Encoder::new();
        let opts = EncodeOptions {
            max_depth: 5,
            ..Default::default()
        };
        assert!(enc.encode(&v, &opts).is_err());
    }
}
