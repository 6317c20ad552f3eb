//! Deterministic, self-describing encoding over nested lists/binaries/integers.
//!
//! The Merkle tree and the routing table both need a byte representation
//! that is a pure function of logical content, independent of map
//! insertion order. Callers achieve this by building `Term::List`s with a
//! fixed, sorted element order *before* calling `encode` -- the encoder
//! itself never reorders anything, it only guarantees that the same
//! `Term` tree always produces the same bytes.

/// A self-describing value tree accepted by a `Serializer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Bytes(Vec<u8>),
    Int(u64),
    List(Vec<Term>),
}

impl Term {
    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Term::Bytes(b.into())
    }

    pub fn list(items: impl Into<Vec<Term>>) -> Self {
        Term::List(items.into())
    }
}

/// Deterministic encode/decode over `Term` trees.
///
/// Implementations must be a pure function of the logical content: the
/// same `Term` tree always serializes to the same bytes, and `decode`
/// must invert `encode` exactly. This property is required for
/// cross-peer hash agreement on Merkle nodes.
pub trait Serializer: Send + Sync {
    fn encode(&self, term: &Term) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Result<Term, DecodeError>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    Truncated,
    #[error("unknown tag byte {0:#x}")]
    UnknownTag(u8),
}

const TAG_BYTES: u8 = 0x00;
const TAG_INT: u8 = 0x01;
const TAG_LIST: u8 = 0x02;

/// Canonical length-prefixed encoder used throughout the core.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalEncoder;

impl Serializer for CanonicalEncoder {
    fn encode(&self, term: &Term) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(term, &mut out);
        out
    }

    fn decode(&self, bytes: &[u8]) -> Result<Term, DecodeError> {
        let (term, rest) = decode_from(bytes)?;
        if !rest.is_empty() {
            // Trailing bytes are tolerated; callers decode a single top-level
            // term and ignore anything appended after it.
        }
        Ok(term)
    }
}

fn encode_len(len: usize, out: &mut Vec<u8>) {
    out.extend_from_slice(&(len as u64).to_be_bytes());
}

fn encode_into(term: &Term, out: &mut Vec<u8>) {
    match term {
        Term::Bytes(b) => {
            out.push(TAG_BYTES);
            encode_len(b.len(), out);
            out.extend_from_slice(b);
        }
        Term::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_be_bytes());
        }
        Term::List(items) => {
            out.push(TAG_LIST);
            encode_len(items.len(), out);
            for item in items {
                encode_into(item, out);
            }
        }
    }
}

fn read_u64(bytes: &[u8]) -> Result<(u64, &[u8]), DecodeError> {
    if bytes.len() < 8 {
        return Err(DecodeError::Truncated);
    }
    let (head, rest) = bytes.split_at(8);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(head);
    Ok((u64::from_be_bytes(buf), rest))
}

fn decode_from(bytes: &[u8]) -> Result<(Term, &[u8]), DecodeError> {
    let (tag, rest) = bytes.split_first().ok_or(DecodeError::Truncated)?;
    match *tag {
        TAG_BYTES => {
            let (len, rest) = read_u64(rest)?;
            let len = len as usize;
            if rest.len() < len {
                return Err(DecodeError::Truncated);
            }
            let (data, rest) = rest.split_at(len);
            Ok((Term::Bytes(data.to_vec()), rest))
        }
        TAG_INT => {
            let (n, rest) = read_u64(rest)?;
            Ok((Term::Int(n), rest))
        }
        TAG_LIST => {
            let (count, mut rest) = read_u64(rest)?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (item, next) = decode_from(rest)?;
                items.push(item);
                rest = next;
            }
            Ok((Term::List(items), rest))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_nested_terms() {
        let enc = CanonicalEncoder;
        let term = Term::list(vec![
            Term::Int(7),
            Term::bytes(vec![1, 2, 3]),
            Term::list(vec![Term::bytes(vec![]), Term::Int(0)]),
        ]);
        let bytes = enc.encode(&term);
        assert_eq!(enc.decode(&bytes).unwrap(), term);
    }

    #[test]
    fn same_content_same_bytes() {
        let enc = CanonicalEncoder;
        let a = Term::list(vec![Term::bytes(b"k".to_vec()), Term::bytes(b"v".to_vec())]);
        let b = Term::list(vec![Term::bytes(b"k".to_vec()), Term::bytes(b"v".to_vec())]);
        assert_eq!(enc.encode(&a), enc.encode(&b));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let enc = CanonicalEncoder;
        assert_eq!(enc.decode(&[TAG_BYTES]), Err(DecodeError::Truncated));
    }
}
