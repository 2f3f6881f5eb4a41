use alphaess_bridge::error::BridgeError;

#[test]
fn error_constructors() {
    assert!(matches!(BridgeError::config("x"), BridgeError::Config { .. }));
    assert!(matches!(BridgeError::transport("x"), BridgeError::Transport { .. }));
    assert!(matches!(BridgeError::auth(6007, "x"), BridgeError::Auth { code: 6007, .. }));
    assert!(matches!(BridgeError::parse("x"), BridgeError::Parse { .. }));
    assert!(matches!(
        BridgeError::rejected(401, "x"),
        BridgeError::Rejected { code: 401, .. }
    ));
    assert!(matches!(
        BridgeError::validation("f", "m"),
        BridgeError::Validation { .. }
    ));
    assert!(matches!(BridgeError::io("x"), BridgeError::Io { .. }));
    assert!(matches!(BridgeError::web("x"), BridgeError::Web { .. }));
}

#[test]
fn unusable_payload_classification() {
    assert!(BridgeError::empty_payload("getLastPowerData").is_unusable_payload());
    assert!(BridgeError::parse("not an object").is_unusable_payload());
    assert!(!BridgeError::transport("timeout").is_unusable_payload());
    assert!(!BridgeError::rejected(6002, "not bound").is_unusable_payload());
}

#[test]
fn display_messages() {
    let s = format!("{}", BridgeError::empty_payload("getLastPowerData"));
    assert!(s.contains("getLastPowerData"));
    let s = format!("{}", BridgeError::validation("mode", "manual only"));
    assert!(s.contains("Validation error"));
}
