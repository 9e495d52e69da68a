fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use bytes::Bytes;
    use peerdrop_protocol::{
        ChunkFrame, ControlMessage, Envelope, FileMeta, PeerRole, SdpType, SignalType,
        TransferConfig,
    };

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture, re-serializes it, and compares the JSON
    /// values field by field. Returns the parsed value for further checks.
    fn roundtrip<T>(name: &str, fixture: serde_json::Value) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    fn envelope(name: &str) -> Envelope {
        roundtrip(name, load_fixture(name))
    }

    // --- Signaling envelopes ---

    #[test]
    fn fixture_join() {
        let env = envelope("envelope_join.json");
        assert_eq!(env, Envelope::join("ABC123"));
    }

    #[test]
    fn fixture_joined() {
        let env = envelope("envelope_joined.json");
        assert_eq!(env.signal, SignalType::Joined);
        assert_eq!(env.role().unwrap(), PeerRole::Initiator);
        assert_eq!(env.peer_count, Some(1));
    }

    #[test]
    fn fixture_room_state() {
        let env = envelope("envelope_room_state.json");
        assert_eq!(env.signal, SignalType::RoomState);
        assert_eq!(env.peer_count, Some(2));
    }

    #[test]
    fn fixture_offer() {
        let env = envelope("envelope_offer.json");
        let desc = env.description().unwrap();
        assert_eq!(desc.sdp_type, SdpType::Offer);
        assert!(desc.sdp.contains("a=max-message-size:16777220"));
    }

    #[test]
    fn fixture_answer() {
        let env = envelope("envelope_answer.json");
        assert_eq!(env.description().unwrap().sdp_type, SdpType::Answer);
        assert!(env.offer.is_none());
    }

    #[test]
    fn fixture_ice_candidate() {
        let env = envelope("envelope_ice_candidate.json");
        let candidate = env.candidate.expect("candidate payload");
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
    }

    #[test]
    fn fixture_error() {
        let env = envelope("envelope_error.json");
        assert_eq!(env.signal, SignalType::Error);
        assert_eq!(env.message.as_deref(), Some("room is full"));
    }

    #[test]
    fn unknown_signal_is_tolerated() {
        let env = Envelope::from_json(r#"{"type":"renegotiate","room":"ABC123"}"#).unwrap();
        assert_eq!(env.signal, SignalType::Unknown);
    }

    // --- Control channel ---

    #[test]
    fn fixture_control_messages() {
        let fixture = load_fixture("control_messages.json");
        let messages: Vec<ControlMessage> = roundtrip("control_messages.json", fixture);
        let kinds: Vec<&str> = messages.iter().map(ControlMessage::kind).collect();
        assert_eq!(
            kinds,
            [
                "file-request",
                "file-accept",
                "file-reject",
                "ack",
                "ping",
                "pong",
                "file-complete",
                "cancel"
            ]
        );
        assert_eq!(
            messages[0].file_meta(),
            Some(FileMeta::new("holiday.jpg", 300_000, "image/jpeg"))
        );
    }

    #[test]
    fn file_request_without_mime_defaults() {
        let msg = ControlMessage::from_json(r#"{"type":"file-request","name":"a.bin","size":1000}"#)
            .unwrap();
        assert_eq!(
            msg.file_meta().unwrap().mime_type,
            "application/octet-stream"
        );
    }

    // --- Data channel ---

    #[test]
    fn fixture_chunk_frames() {
        let fixture = load_fixture("chunk_frames.json");
        for case in fixture.as_array().expect("array of frames") {
            let index = case["index"].as_u64().unwrap() as u32;
            let payload = hex::decode(case["payloadHex"].as_str().unwrap()).unwrap();
            let wire = hex::decode(case["wireHex"].as_str().unwrap()).unwrap();

            let frame = ChunkFrame::new(index, payload.clone());
            assert_eq!(&frame.encode()[..], &wire[..], "encode index {index}");
            assert_eq!(frame.wire_len(), wire.len());

            let decoded = ChunkFrame::decode(Bytes::from(wire)).unwrap();
            assert_eq!(decoded.index, index);
            assert_eq!(&decoded.payload[..], &payload[..]);
        }
    }

    #[test]
    fn fixture_transfer_config() {
        let fixture = load_fixture("transfer_config.json");
        let config: TransferConfig = roundtrip("transfer_config.json", fixture);
        assert_eq!(config, TransferConfig::default());
    }
}
