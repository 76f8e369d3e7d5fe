use std::io::Write;

use jksn_base::Result;

/// The intermediate form between a [`crate::Value`] tree and wire bytes.
///
/// Dispatch (value -> node) happens once per value; the dedup/delta optimizer
/// then walks the resulting tree in place, possibly rewriting a node's
/// `control`/`length_field`/`payload` to a cheaper equivalent before
/// linearization. Checksum/pragma/refresher wrapping is handled procedurally
/// at the encode/decode entry points instead of as a `Node` shape, since both
/// directions already have the wrapped value's bytes in hand (in memory on
/// encode, streamed through a hashing reader on decode) without needing a
/// tree node to carry a trailing byte range.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) control: u8,
    pub(crate) length_field: Vec<u8>,
    pub(crate) payload: Vec<u8>,
    pub(crate) children: Vec<Node>,
    /// DJB-8 of `payload`, set for every text/blob leaf regardless of length;
    /// the dedup optimizer only *acts* on it once payload length exceeds 1.
    pub(crate) hash: Option<u8>,
    /// The node's original logical integer value, set only when this node was
    /// built from an absolute-integer dispatch. Consulted (and then cleared)
    /// by the delta-rewrite pass; irrelevant to every other node kind.
    pub(crate) origin: Option<i64>,
}

impl Node {
    pub(crate) fn leaf(control: u8) -> Node {
        Node {
            control,
            length_field: Vec::new(),
            payload: Vec::new(),
            children: Vec::new(),
            hash: None,
            origin: None,
        }
    }

    pub(crate) fn with_payload(control: u8, payload: Vec<u8>) -> Node {
        Node {
            payload,
            ..Node::leaf(control)
        }
    }

    pub(crate) fn wire_len(&self) -> usize {
        1 + self.length_field.len() + self.payload.len()
    }

    /// The bounded-depth size estimate used to choose straight vs. transposed
    /// array encodings: this node, its immediate children, and their immediate
    /// children, with no deeper recursion.
    pub(crate) fn depth3_size(&self) -> usize {
        let mut total = self.wire_len();
        for child in &self.children {
            total += child.wire_len();
            for grandchild in &child.children {
                total += grandchild.wire_len();
            }
        }
        total
    }

    pub(crate) fn write_to(&self, out: &mut impl Write) -> Result<()> {
        out.write_all(&[self.control])?;
        out.write_all(&self.length_field)?;
        out.write_all(&self.payload)?;
        for child in &self.children {
            child.write_to(out)?;
        }
        Ok(())
    }

    pub(crate) fn linearize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn test_leaf_wire_len() {
        let n = Node::with_payload(0x1B, vec![0, 0, 0, 1]);
        assert_eq!(n.wire_len(), 5);
    }

    #[test]
    fn test_depth3_size_stops_at_grandchildren() {
        let leaf = Node::leaf(0x12);
        let mid = Node {
            children: vec![leaf.clone(), leaf.clone()],
            ..Node::leaf(0x81)
        };
        let top = Node {
            children: vec![mid],
            ..Node::leaf(0x81)
        };
        // top(1) + mid(1) + two leaves(1 each) = 4
        assert_eq!(top.depth3_size(), 4);
    }
}
