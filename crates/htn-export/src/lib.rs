// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical encoding of exported task grammars.
//! CBOR bytes of an [`ExportTree`] with a BLAKE3 digest over them, wrapped in a
//! versioned [`ExportFrame`] that is checked on decode.

use blake3::Hash;
use ciborium::de::from_reader;
use ciborium::ser::into_writer;
use htn_core::ExportTree;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Blake3 digest of canonical tree bytes (32 bytes).
pub type Hash32 = [u8; 32];

/// Frame layout version written by [`encode_frame`].
pub const FRAME_VERSION: u16 = 1;

/// Failure while encoding or decoding an export frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// CBOR serialization failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// CBOR deserialization failed.
    #[error("decode error: {0}")]
    Decode(String),
    /// The stored digest does not match the decoded tree.
    #[error("digest mismatch: frame says {expected}, tree hashes to {actual}")]
    DigestMismatch {
        /// Hex digest carried by the frame.
        expected: String,
        /// Hex digest recomputed from the tree.
        actual: String,
    },
    /// Frame written by an unknown layout version.
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u16),
}

/// Versioned envelope around an export tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportFrame {
    /// Layout version; see [`FRAME_VERSION`].
    pub version: u16,
    /// Digest of `to_canonical_bytes(&tree)`.
    pub digest: Hash32,
    /// The exported grammar.
    pub tree: ExportTree,
}

impl ExportFrame {
    /// Wraps `tree` at the current version, computing its digest.
    pub fn new(tree: ExportTree) -> Result<Self, CodecError> {
        let digest = compute_hash(&tree)?;
        Ok(Self {
            version: FRAME_VERSION,
            digest,
            tree,
        })
    }

    /// Lowercase hex form of the digest.
    pub fn digest_hex(&self) -> String {
        digest_hex(&self.digest)
    }
}

/// Canonical CBOR bytes of `tree`.
///
/// The tree is already in preorder with dense indices, so serializing it
/// field by field is deterministic.
pub fn to_canonical_bytes(tree: &ExportTree) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    into_writer(tree, &mut bytes).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Blake3 hash of the canonical bytes.
pub fn compute_hash(tree: &ExportTree) -> Result<Hash32, CodecError> {
    let h: Hash = blake3::hash(&to_canonical_bytes(tree)?);
    Ok(h.into())
}

/// Lowercase hex rendering of a digest.
pub fn digest_hex(digest: &Hash32) -> String {
    Hash::from(*digest).to_hex().to_string()
}

/// Encodes `tree` as a framed CBOR blob.
pub fn encode_frame(tree: &ExportTree) -> Result<Vec<u8>, CodecError> {
    let frame = ExportFrame::new(tree.clone())?;
    let mut bytes = Vec::new();
    into_writer(&frame, &mut bytes).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a framed blob, rejecting unknown versions and digest mismatches.
pub fn decode_frame(bytes: &[u8]) -> Result<ExportFrame, CodecError> {
    let frame: ExportFrame = from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    if frame.version != FRAME_VERSION {
        return Err(CodecError::UnsupportedVersion(frame.version));
    }
    let actual = compute_hash(&frame.tree)?;
    if actual != frame.digest {
        return Err(CodecError::DigestMismatch {
            expected: digest_hex(&frame.digest),
            actual: digest_hex(&actual),
        });
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use htn_core::{Grammar, Sentinels};

    fn tree() -> ExportTree {
        let mut g = Grammar::new();
        let init = g.add_primitive("0 - init_action", "init_action", "init_state", "s0");
        let a = g.add_primitive("1 - a", "a", "s0", "s1");
        let b = g.add_primitive("2 - b", "b", "s0", "s1");
        let term = g.add_primitive("3 - term_action", "term_action", "term_state", "");
        let ch = g.add_choice("C0", vec![a, b], vec![0.25, 0.75], "s0", "s1").unwrap();
        let root = g.add_sequence("S0", vec![init, ch, term], "init_state", "").unwrap();
        ExportTree::from_grammar(&g, root, &Sentinels::default()).unwrap()
    }

    #[test]
    fn canonical_bytes_are_stable() {
        let t = tree();
        assert_eq!(to_canonical_bytes(&t).unwrap(), to_canonical_bytes(&t.clone()).unwrap());
        assert_eq!(compute_hash(&t).unwrap(), compute_hash(&tree()).unwrap());
    }

    #[test]
    fn weight_change_changes_digest() {
        let t = tree();
        let mut other = t.clone();
        other.nodes[2].weights[0] = 0.5;
        assert_ne!(compute_hash(&t).unwrap(), compute_hash(&other).unwrap());
    }

    #[test]
    fn digest_hex_is_64_lowercase_chars() {
        let frame = ExportFrame::new(tree()).unwrap();
        let hex = frame.digest_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
