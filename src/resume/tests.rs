use super::*;

fn binding(branch: Option<&str>, conversation: Option<(&str, &str)>) -> SessionBinding {
    SessionBinding {
        project: ProjectName::new("proj1").unwrap(),
        branch: branch.map(|b| BranchName::new(b).unwrap()),
        conversation: conversation.map(|(e, i)| ConversationRef::new(e, i)),
    }
}

fn samples() -> Vec<SessionBinding> {
    vec![
        binding(None, None),
        binding(Some("main"), None),
        binding(Some("feature/x"), Some(("claude", "0f8e-4b1c-session"))),
        binding(None, Some(("codex", "thread with spaces and ünïcode"))),
        binding(Some("fix-1"), Some(("claude", "id:with/odd=chars+"))),
    ]
}

#[test]
fn every_supported_version_decodes_back_to_the_same_binding() {
    for version in SUPPORTED_VERSIONS {
        for b in samples() {
            let token = encode_version(*version, &b).unwrap();
            assert_eq!(decode(&token).unwrap(), b, "version {version}, token {token}");
        }
    }
}

#[test]
fn encoding_is_deterministic_and_current() {
    let b = binding(Some("main"), Some(("claude", "abc")));
    assert_eq!(encode(&b), encode(&b));
    assert!(encode(&b).starts_with("cr2_"));
}

#[test]
fn tokens_are_transport_safe() {
    for b in samples() {
        let token = encode(&b);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            "{token}"
        );
    }
}

#[test]
fn future_version_is_unsupported() {
    let token = encode(&binding(None, None)).replacen("cr2_", "cr9_", 1);
    assert!(matches!(decode(&token), Err(BridgeError::UnsupportedVersion(9))));
    assert!(matches!(
        encode_version(3, &binding(None, None)),
        Err(BridgeError::UnsupportedVersion(3))
    ));
}

#[test]
fn structural_corruption_is_malformed() {
    for bad in ["", "hello", "cr_abc", "crx_abc", "cr2_", "cr2_!!!!", "cr2_AAAA"] {
        assert!(
            matches!(decode(bad), Err(BridgeError::MalformedToken(_))),
            "{bad:?}"
        );
    }
}

/// Turn the first `1` of the payload ("proj1") into `2`, keeping the checksum
fn tamper(token: &str) -> String {
    let (prefix, payload) = token.split_at(4);
    let mut bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
    let pos = bytes.iter().position(|b| *b == b'1').unwrap();
    bytes[pos] = b'2';
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

#[test]
fn flipped_payload_byte_is_rejected_not_misdecoded() {
    let token = encode(&binding(Some("main"), Some(("claude", "abc"))));
    assert!(matches!(
        decode(&tamper(&token)),
        Err(BridgeError::MalformedToken(_))
    ));
}

#[test]
fn flipped_v1_payload_byte_is_rejected_not_misdecoded() {
    let token = encode_version(1, &binding(Some("main"), Some(("claude", "abc")))).unwrap();
    assert!(token.starts_with("cr1_"));
    assert!(matches!(
        decode(&tamper(&token)),
        Err(BridgeError::MalformedToken(_))
    ));
}

#[test]
fn v1_without_checksum_is_malformed() {
    let payload = URL_SAFE_NO_PAD.encode("proj1\0main\0claude\0abc");
    assert!(matches!(
        decode(&format!("cr1_{payload}")),
        Err(BridgeError::MalformedToken(_))
    ));
}

#[test]
fn v1_rejects_unsafe_fields_after_decode() {
    let v1 = |raw: &str| format!("cr1_{}", URL_SAFE_NO_PAD.encode(seal(raw.as_bytes().to_vec())));

    assert!(matches!(
        decode(&v1("proj1\0../escape\0\0")),
        Err(BridgeError::MalformedToken(_))
    ));
    assert!(matches!(
        decode(&v1("proj1\0main\0claude")),
        Err(BridgeError::MalformedToken(_))
    ));
    assert_eq!(
        decode(&v1("proj1\0main\0\0")).unwrap(),
        binding(Some("main"), None)
    );
}

#[test]
fn v1_cannot_carry_nul() {
    let b = binding(None, Some(("claude", "a\0b")));
    assert!(encode_version(1, &b).is_err());
    // The current version carries it fine
    assert_eq!(decode(&encode(&b)).unwrap(), b);
}

#[test]
fn find_token_extracts_from_message() {
    let b = binding(Some("main"), None);
    let token = encode(&b);
    let text = format!("continue please {token} and add tests");

    let (found, rest) = find_token(&text).unwrap();
    assert_eq!(found, token);
    assert_eq!(rest, "continue please  and add tests");
    assert!(find_token("no token here").is_none());
}

#[test]
fn find_token_stops_at_punctuation() {
    let token = encode(&binding(Some("main"), Some(("claude", "abc"))));

    for text in [
        format!("resume ({token}) please"),
        format!("here: {token}, thanks"),
        format!("{token}."),
        format!("\"{token}\""),
    ] {
        let (found, _) = find_token(&text).unwrap_or_else(|| panic!("no token in {text:?}"));
        assert_eq!(found, token, "{text:?}");
        assert_eq!(decode(&found).unwrap(), binding(Some("main"), Some(("claude", "abc"))));
    }

    let (_, rest) = find_token(&format!("resume ({token}) please")).unwrap();
    assert_eq!(rest, "resume () please");
    assert!(find_token(&format!("x{token}")).is_none());
}
