//! Property-based tests for the JSON packet codec and room codes.
//!
//! 1. Any well-formed packet survives encode → decode unchanged.
//! 2. Arbitrary text never panics the decoder.
//! 3. Binary message fields survive the base64 wrapping byte-for-byte.
//! 4. `normalize` accepts exactly the trimmed codes within the length bounds.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use xtty_proto::packet::{
    AuthData, ErrorData, KeyConfirmData, KeyExchangeData, MessageData, Packet, Payload,
};
use xtty_proto::room_code::{self, MAX_ROOM_CODE_LEN, RoomCodeError};
use xtty_proto::{codec, decode, encode};

/// Timestamps between 1970 and roughly 2100, with millisecond precision.
fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800_000).prop_map(|ms| {
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or_else(Utc::now)
    })
}

fn arb_pem_like() -> impl Strategy<Value = String> {
    "[A-Za-z0-9+/=\n-]{0,512}"
}

fn arb_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        (".{0,64}", arb_pem_like()).prop_map(|(username, public_key)| Payload::Auth(AuthData {
            username,
            public_key
        })),
        arb_pem_like().prop_map(|key| Payload::KeyExchange(KeyExchangeData { key })),
        ".{0,64}".prop_map(|from| Payload::KeyConfirm(KeyConfirmData { from })),
        (
            prop::collection::vec(any::<u8>(), 0..1024),
            prop::collection::vec(any::<u8>(), 0..512),
            prop::option::of(prop::collection::vec(any::<u8>(), 0..512)),
        )
            .prop_map(|(ct, wk, sig)| Payload::Message(MessageData::from_parts(
                &ct,
                &wk,
                sig.as_deref()
            ))),
        ".{0,128}".prop_map(|reason| Payload::Error(ErrorData { reason })),
    ]
}

fn arb_packet() -> impl Strategy<Value = Packet> {
    (arb_timestamp(), arb_payload()).prop_map(|(timestamp, payload)| Packet { timestamp, payload })
}

proptest! {
    #[test]
    fn packet_round_trip(packet in arb_packet()) {
        let text = encode(&packet).unwrap();
        let decoded = decode(&text).unwrap();
        prop_assert_eq!(decoded, packet);
    }

    #[test]
    fn arbitrary_text_never_panics(text in ".{0,512}") {
        let _ = codec::decode(&text);
    }

    #[test]
    fn json_objects_with_random_type_never_panic(kind in "[a-z_]{0,16}", data in ".{0,64}") {
        let text = serde_json::json!({
            "type": kind,
            "timestamp": "2026-01-01T00:00:00Z",
            "data": { "key": data, "from": data, "reason": data },
        })
        .to_string();
        let _ = decode(&text);
    }

    #[test]
    fn message_bytes_survive_base64(
        ct in prop::collection::vec(any::<u8>(), 0..2048),
        wk in prop::collection::vec(any::<u8>(), 0..512),
        sig in prop::option::of(prop::collection::vec(any::<u8>(), 1..512)),
    ) {
        let data = MessageData::from_parts(&ct, &wk, sig.as_deref());
        prop_assert_eq!(data.ciphertext().unwrap(), ct);
        prop_assert_eq!(data.wrapped_key().unwrap(), wk);
        prop_assert_eq!(data.signature().unwrap(), sig);
    }

    #[test]
    fn normalize_respects_bounds(code in "[ ]{0,3}[A-Za-z0-9]{0,80}[ ]{0,3}") {
        let trimmed = code.trim();
        match room_code::normalize(&code) {
            Ok(c) => {
                prop_assert_eq!(c, trimmed);
                prop_assert!(!c.is_empty() && c.len() <= MAX_ROOM_CODE_LEN);
            }
            Err(RoomCodeError::Empty) => prop_assert!(trimmed.is_empty()),
            Err(RoomCodeError::TooLong(n)) => {
                prop_assert_eq!(n, trimmed.len());
                prop_assert!(n > MAX_ROOM_CODE_LEN);
            }
        }
    }
}
