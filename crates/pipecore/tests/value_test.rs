use pipecore::{Value, ValueMap};

#[test]
fn test_large_integers_survive_json() {
    // 2^53 + 1 has no exact f64 representation
    let json: serde_json::Value = serde_json::from_str("{\"id\": 9007199254740993}").unwrap();

    let value = Value::from(json.clone());
    let id = value.as_object().unwrap().get("id").unwrap();
    assert_eq!(id, &Value::Integer(9_007_199_254_740_993));
    assert_eq!(id.as_i64(), Some(9_007_199_254_740_993));

    assert_eq!(value.to_json(), json);
    assert_eq!(
        serde_json::to_string(&value).unwrap(),
        "{\"id\":9007199254740993}"
    );
}

#[test]
fn test_deserialize_keeps_integers_exact() {
    let value: Value = serde_json::from_str("[9223372036854775807, 1.5, -3]").unwrap();

    assert_eq!(
        value,
        Value::Array(vec![
            Value::Integer(i64::MAX),
            Value::Number(1.5),
            Value::Integer(-3),
        ])
    );
    assert_eq!(value.to_display_string(), "[9223372036854775807,1.5,-3]");
}

#[test]
fn test_integer_and_float_compare_by_value() {
    assert_eq!(Value::from(7), Value::Number(7.0));
    assert_eq!(Value::Number(7.0), Value::Integer(7));
    assert_ne!(Value::Integer(7), Value::Number(7.5));
    assert_eq!(Value::Integer(7).type_name(), "number");
    assert_eq!(Value::Integer(7).as_f64(), Some(7.0));
    assert_eq!(Value::Number(7.5).as_i64(), None);
}

#[test]
fn test_u64_beyond_i64_falls_back_to_float() {
    assert_eq!(Value::from(42u64), Value::Integer(42));
    assert!(matches!(Value::from(u64::MAX), Value::Number(_)));

    let mut map = ValueMap::new();
    map.insert("n".to_string(), Value::from(u64::MAX));
    let json = Value::Object(map).to_json();
    assert!(json["n"].is_number());
}
