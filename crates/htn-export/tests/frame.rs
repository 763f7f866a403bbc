// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]

use htn_core::{learn, LearnOptions};
use htn_export::{
    compute_hash, decode_frame, encode_frame, CodecError, ExportFrame, FRAME_VERSION,
};

fn demo(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| (*t).to_owned()).collect()
}

fn learned_tree() -> htn_core::ExportTree {
    let demos = vec![
        demo(&["init_state", "init_action", "s0", "a", "s1", "c", "term_state", "term_action"]),
        demo(&["init_state", "init_action", "s0", "a", "s2", "d", "term_state", "term_action"]),
        demo(&["init_state", "init_action", "s5", "b", "s2", "d", "term_state", "term_action"]),
    ];
    let learned = learn(&demos, LearnOptions::default()).expect("learn");
    learned.export().expect("export")
}

fn write(frame: &ExportFrame) -> Vec<u8> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(frame, &mut bytes).expect("cbor");
    bytes
}

#[test]
fn frame_round_trip_is_lossless() {
    let tree = learned_tree();
    let bytes = encode_frame(&tree).expect("encode");
    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.version, FRAME_VERSION);
    assert_eq!(frame.digest, compute_hash(&tree).expect("hash"));
    assert_eq!(frame.tree, tree);
    for (a, b) in frame.tree.nodes.iter().zip(&tree.nodes) {
        assert_eq!(a.weights, b.weights);
    }
}

#[test]
fn tampered_tree_fails_digest_check() {
    let mut frame = ExportFrame::new(learned_tree()).expect("frame");
    frame.tree.nodes[0].name.push('!');
    let err = decode_frame(&write(&frame)).expect_err("tampered");
    assert!(matches!(err, CodecError::DigestMismatch { .. }), "{err}");
}

#[test]
fn unknown_version_is_rejected() {
    let mut frame = ExportFrame::new(learned_tree()).expect("frame");
    frame.version = FRAME_VERSION + 1;
    assert_eq!(
        decode_frame(&write(&frame)).expect_err("version"),
        CodecError::UnsupportedVersion(FRAME_VERSION + 1)
    );
}

#[test]
fn garbage_is_a_decode_error() {
    let err = decode_frame(&[0xff, 0x00, 0x13]).expect_err("garbage");
    assert!(matches!(err, CodecError::Decode(_)));
}
