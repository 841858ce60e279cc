//! Integration tests for the chirp-core command codec.
//!
//! These exercise the public API the node uses: build a command, encode it
//! for a transport's send unit, and decode what arrives from the radio.

use chirp_core::{
    decode_message, decode_str, encode_bounded, encode_message, DecodeError, Message, MessageKind,
    NotificationKind, MAX_PAYLOAD_LEN,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Encodes a message and decodes it again.
fn roundtrip(msg: &Message) -> Message {
    let text = encode_message(msg);
    decode_str(&text).expect("decode must succeed")
}

#[test]
fn test_roundtrip_every_kind() {
    let samples = [
        Message::chat(1701, "hi"),
        Message::play_sound(1892, "dog.wav"),
        Message::notification_tone(2001, NotificationKind::Error.index()),
        Message::ping_identity(1500, "chirp-1500"),
    ];

    for msg in &samples {
        assert_eq!(&roundtrip(msg), msg);
    }
}

#[test]
fn test_roundtrip_random_payloads() {
    // Payloads drawn from printable ASCII plus ':' to stress the splitter.
    let mut rng = StdRng::seed_from_u64(0xC41);
    let alphabet: Vec<char> = (' '..='~').collect();

    for _ in 0..200 {
        let len = rng.gen_range(0..=MAX_PAYLOAD_LEN);
        let payload: String = (0..len)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect();
        let kind = MessageKind::ALL[rng.gen_range(0..MessageKind::ALL.len())];
        let msg = Message::new(rng.gen_range(1500..2500), kind, payload);

        assert_eq!(roundtrip(&msg), msg);
    }
}

#[test]
fn test_bounded_frame_for_broadcast_unit_decodes() {
    // Arrange: a payload at the limit still fits a 250-byte broadcast unit.
    let msg = Message::chat(2499, "z".repeat(MAX_PAYLOAD_LEN));

    // Act
    let frame = encode_bounded(&msg, 250);
    let decoded = decode_message(&frame).expect("decode");

    // Assert
    assert_eq!(decoded, msg);
}

#[test]
fn test_malformed_frames_fail_closed() {
    let cases: [&[u8]; 6] = [b"", b"1701", b"1701:c", b"x:c:hi", b"1701:q:hi", &[0xFF, b':', b'c', b':']];

    for raw in cases {
        assert!(decode_message(raw).is_err(), "{raw:?} must be rejected");
    }
}

#[test]
fn test_missing_separator_reports_count() {
    assert_eq!(
        decode_message(b"1701c hi"),
        Err(DecodeError::MissingSeparator { found: 0 })
    );
}
