/// Encoder configuration.
///
/// `check_circular` is kept for interface symmetry with decoders in other
/// languages that operate over an aliasable value graph. An owned `Value` tree
/// (no `Rc`/interior mutability anywhere in this model) cannot structurally
/// contain a cycle, so when enabled this instead guards against runaway
/// nesting depth, surfacing [`jksn_base::ErrorKind::MaxDepthExceeded`] rather
/// than ever genuinely detecting a pointer cycle.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub header: bool,
    pub check_circular: bool,
    pub max_depth: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            header: true,
            check_circular: true,
            max_depth: 512,
        }
    }
}

/// Decoder configuration.
///
/// `ordered_map` decides how a decoded map handles repeated keys: `true`
/// preserves every pair exactly as seen on the wire, including duplicates;
/// `false` collapses a later occurrence of an already-seen key into the
/// position of its first occurrence, taking the later value: the usual
/// object/dict "last write wins, first position sticks" shape.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub header: bool,
    pub ordered_map: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            header: true,
            ordered_map: false,
        }
    }
}
