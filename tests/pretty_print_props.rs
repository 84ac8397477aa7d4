//! Property tests for the order-preserving pretty-printer.

use chat_relay::pretty_print;
use proptest::prelude::*;
use serde_json::{Map, Number, Value};

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(Number::from(n))),
        // Quotes, backslashes and structural characters inside strings
        "[a-z{}\\[\\],:\"\\\\ ]{0,12}".prop_map(Value::String),
    ];

    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::vec(("[a-z_]{1,8}", inner), 0..6).prop_map(|entries| {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key, value);
                }
                Value::Object(map)
            }),
        ]
    })
}

proptest! {
    #[test]
    fn pretty_output_reparses_to_same_value(value in arb_json()) {
        let compact = serde_json::to_string(&value).unwrap();
        let pretty = pretty_print(&compact);

        let reparsed: Value = serde_json::from_str(&pretty).unwrap();
        prop_assert_eq!(reparsed, value);
    }

    #[test]
    fn invalid_json_is_echoed(text in "[a-z ]{1,20}") {
        prop_assume!(serde_json::from_str::<Value>(&text).is_err());
        prop_assert_eq!(pretty_print(&text), text);
    }

    #[test]
    fn key_order_is_kept(keys in prop::collection::vec("[a-z]{1,6}", 1..8)) {
        let mut seen = std::collections::HashSet::new();
        let keys: Vec<String> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let body = keys
            .iter()
            .enumerate()
            .map(|(i, key)| format!("\"{key}\":{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let compact = format!("{{{body}}}");
        let pretty = pretty_print(&compact);

        let mut last = 0;
        for key in &keys {
            let needle = format!("\"{key}\":");
            let pos = pretty[last..].find(&needle).map(|p| p + last);
            prop_assert!(pos.is_some(), "key {} out of order in {}", key, pretty);
            last = pos.unwrap_or(last);
        }
    }
}
