//! JKSN: a binary serialization format for the JSON data model, with
//! stream-local delta-integer and dedup-reference rewriting, automatic
//! tabular transposition of map arrays, and optional integrity wrapping.

mod decode;
mod encode;
mod hash;
mod ioutil;
mod json;
mod node;
mod opcode;
mod options;
mod value;

#[cfg(test)]
mod test;

pub use decode::{decode, decode_from, Decoder};
pub use encode::{encode, encode_to, Encoder};
pub use hash::ChecksumKind;
pub use options::{DecodeOptions, EncodeOptions};
pub use value::Value;

pub use jksn_base::{Error, ErrorKind, Result};
