use proptest::prelude::*;
use scbridge::osc::{
    decode_message, decode_packet, encode_bundle, encode_message, encode_packet,
};
use scbridge::{OscBundle, OscMessage, OscPacket, OscValue, TimeTag};

fn value_strategy() -> impl Strategy<Value = OscValue> {
    prop_oneof![
        "[a-zA-Z0-9 /_.-]{0,24}".prop_map(OscValue::Str),
        any::<i32>().prop_map(OscValue::Int),
        (-1.0e6f32..1.0e6f32).prop_map(OscValue::Float),
        (-1.0e9f64..1.0e9f64).prop_map(OscValue::Double),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(OscValue::Blob),
        Just(OscValue::True),
        Just(OscValue::False),
        Just(OscValue::Nil),
    ]
}

fn message_strategy() -> impl Strategy<Value = OscMessage> {
    (
        "/[a-z_]{1,12}(/[a-z_]{1,8}){0,2}",
        prop::collection::vec(value_strategy(), 0..6),
    )
        .prop_map(|(address, args)| OscMessage { address, args })
}

fn packet_strategy() -> impl Strategy<Value = OscPacket> {
    message_strategy().prop_map(OscPacket::Message).prop_recursive(
        3,
        16,
        4,
        |inner| {
            (
                any::<u32>(),
                any::<u32>(),
                prop::collection::vec(inner, 0..4),
            )
                .prop_map(|(seconds, fraction, elements)| {
                    OscPacket::Bundle(OscBundle {
                        time_tag: TimeTag::new(seconds, fraction),
                        elements,
                    })
                })
        },
    )
}

proptest! {
    #[test]
    fn message_roundtrip(message in message_strategy()) {
        let bytes = encode_message(&message).unwrap();
        prop_assert_eq!(bytes.len() % 4, 0);
        prop_assert_eq!(decode_message(&bytes).unwrap(), message);
    }

    #[test]
    fn packet_roundtrip(packet in packet_strategy()) {
        let bytes = encode_packet(&packet).unwrap();
        prop_assert_eq!(bytes.len() % 4, 0);
        prop_assert_eq!(decode_packet(&bytes).unwrap(), packet);
    }

    #[test]
    fn encoded_strings_are_padded_and_terminated(text in "[a-zA-Z0-9 ]{0,32}") {
        let message = OscMessage::new("/pad", vec![OscValue::Str(text.clone())]).unwrap();
        let bytes = encode_message(&message).unwrap();
        prop_assert_eq!(bytes.len() % 4, 0);
        // the serialized argument region must carry at least one terminator
        prop_assert!(bytes.iter().filter(|b| **b == 0).count() >= 1);
        prop_assert_eq!(decode_message(&bytes).unwrap(), message);
    }
}

#[test]
fn s_new_example_roundtrips_with_declared_types() {
    let message = OscMessage::new(
        "/s_new",
        vec![
            OscValue::Str("default".into()),
            OscValue::Int(1000),
            OscValue::Int(0),
            OscValue::Int(0),
        ],
    )
    .unwrap();

    let bytes = encode_message(&message).unwrap();
    let decoded = decode_message(&bytes).unwrap();

    assert_eq!(decoded.address, "/s_new");
    let tags: String = decoded.args.iter().map(OscValue::type_tag).collect();
    assert_eq!(tags, "siii");
    assert_eq!(decoded, message);
}

#[test]
fn nested_bundles_keep_depth_and_order() {
    let leaf = |addr: &str, n: i32| {
        OscPacket::Message(OscMessage::new(addr, vec![OscValue::Int(n)]).unwrap())
    };
    let inner = OscBundle {
        time_tag: TimeTag::new(3_900_000_000, 1 << 31),
        elements: vec![leaf("/inner/a", 1), leaf("/inner/b", 2)],
    };
    let outer = OscBundle {
        time_tag: TimeTag::IMMEDIATE,
        elements: vec![
            leaf("/first", 0),
            OscPacket::Bundle(inner),
            leaf("/last", 9),
        ],
    };

    let bytes = encode_bundle(&outer).unwrap();
    let decoded = match decode_packet(&bytes).unwrap() {
        OscPacket::Bundle(bundle) => bundle,
        other => panic!("expected bundle, got {other:?}"),
    };

    assert_eq!(decoded, outer);
    match &decoded.elements[1] {
        OscPacket::Bundle(inner) => assert_eq!(inner.elements.len(), 2),
        other => panic!("expected nested bundle, got {other:?}"),
    }
}
