//! Integration tests for the public simon-core API: bindings flowing from the
//! registry through the codec, and device responses flowing back as verdicts.

use simon_core::protocol::{decode_pattern, CHECK_COMMAND, SUCCESS_TOKENS};
use simon_core::{
    decode_verdict, BindingError, Challenge, Codec, CodecMode, KeyCode, KeyRegistry, Verdict,
};

fn default_bindings() -> KeyRegistry {
    let registry = KeyRegistry::new();
    let table: [(&str, Vec<u32>); 5] = [
        ("W", vec![1, 2, 3, 2, 1]),
        ("A", vec![3, 1, 3, 1]),
        ("S", vec![2, 4, 2, 1, 3, 4]),
        ("D", vec![4, 3, 2, 1]),
        ("Space", vec![1, 2, 3, 4, 4, 3, 2, 1]),
    ];
    for (name, steps) in table {
        let key = KeyCode::from_name(name).expect("known key");
        let challenge = Challenge::pattern(steps).expect("non-empty");
        registry.register(key, challenge).expect("valid binding");
    }
    registry
}

#[test]
fn test_registered_pattern_survives_pattern_mode_encoding() {
    let registry = default_bindings();
    let codec = Codec::new(CodecMode::Pattern);

    for binding in registry.bindings() {
        let wire = codec.encode_challenge(&binding.challenge).expect("encodable");
        let Challenge::Pattern(steps) = &binding.challenge else {
            panic!("defaults are patterns");
        };
        assert_eq!(&decode_pattern(&wire).expect("decodable"), steps);
    }
    assert_eq!(codec.verify_request(), Some(CHECK_COMMAND));
}

#[test]
fn test_length_mode_sends_complexity_of_each_binding() {
    let registry = default_bindings();
    let codec = Codec::new(CodecMode::Length);

    let space = registry.lookup(KeyCode::SPACE).expect("Space registered");
    assert_eq!(codec.encode_challenge(&space.challenge).unwrap(), "8");

    let a = registry.lookup(KeyCode(0x41)).expect("A registered");
    assert_eq!(codec.encode_challenge(&a.challenge).unwrap(), "4");
}

#[test]
fn test_boundary_lengths() {
    assert_eq!(Challenge::length(0), Err(BindingError::NonPositiveLength(0)));
    assert_eq!(Challenge::length(-1), Err(BindingError::NonPositiveLength(-1)));
    assert_eq!(Challenge::length(1), Ok(Challenge::Length(1)));
}

#[test]
fn test_device_responses_map_to_verdicts() {
    for token in SUCCESS_TOKENS {
        assert!(decode_verdict(&format!("{token}\n")).is_success());
    }
    assert_eq!(decode_verdict("False\n"), Verdict::Failure);
    assert_eq!(decode_verdict("READY\n"), Verdict::Indeterminate);
    assert!(!decode_verdict("").is_success(), "silence must never unlock");
}
