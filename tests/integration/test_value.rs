// Copyright © 2024 Pathway

use assert_matches::assert_matches;

use deltaflow_engine::engine::{DateTime, Error, Key, SimpleType, Value};

#[test]
fn test_structural_keys_match_for_equal_composites() {
    let first = Value::from(vec![
        Value::Int(1),
        Value::from("abc"),
        Value::from(vec![Value::Bool(true), Value::None]),
    ]);
    let second = Value::from(vec![
        Value::Int(1),
        Value::from("abc"),
        Value::from(vec![Value::Bool(true), Value::None]),
    ]);
    assert_eq!(first, second);
    assert_eq!(Key::for_value(&first), Key::for_value(&second));
}

#[test]
fn test_structural_keys_are_type_tagged() {
    assert_ne!(
        Key::for_value(&Value::Int(1)),
        Key::for_value(&Value::from(1.0))
    );
    assert_ne!(
        Key::for_value(&Value::Int(1)),
        Key::for_value(&Value::BigInt(1))
    );
    assert_ne!(
        Key::for_value(&Value::None),
        Key::for_value(&Value::from(""))
    );
}

#[test]
fn test_float_key_normalization() {
    assert_eq!(
        Key::for_value(&Value::from(0.0)),
        Key::for_value(&Value::from(-0.0))
    );
    assert_eq!(
        Key::for_value(&Value::from(f64::NAN)),
        Key::for_value(&Value::from(-f64::NAN))
    );
    assert_ne!(
        Key::for_value(&Value::from(0.0)),
        Key::for_value(&Value::from(f64::NAN))
    );
}

#[test]
fn test_key_for_values() {
    let values = [Value::Int(42), Value::from("x")];
    assert_eq!(Key::for_values(&values), Key::for_values(&values));
    assert_ne!(Key::for_values(&values), Key::for_values(&values[..1]));
    // the empty slice still has a stable key
    assert_eq!(Key::for_values(&[]), Key::for_values(&[]));
    assert_ne!(Key::for_values(&[]), Key::for_values(&[Value::None]));
}

#[test]
fn test_key_display() {
    let key = Key::for_value(&Value::Int(7));
    let display = key.to_string();
    assert!(display.starts_with('^'));
    assert_eq!(format!("{key:?}"), display);
}

#[test]
fn test_pointer_values() {
    let key = Key::random();
    let pointer = Value::from(key);
    assert_eq!(pointer.as_pointer().expect("pointer value"), key);
    assert_eq!(pointer.to_string(), key.to_string());
    assert!(pointer.is_scalar());
    assert_ne!(Key::random(), Key::random());
}

#[test]
fn test_handle_key_is_memoized() {
    let first = Value::bytes([1u8, 2, 3]);
    let second = Value::bytes([1u8, 2, 3]);
    assert_eq!(first, second);
    assert_eq!(Key::for_value(&first), Key::for_value(&second));
    let (Value::Bytes(first), Value::Bytes(second)) = (&first, &second) else {
        panic!("expected bytes values");
    };
    assert_eq!(first.key(), second.key());
    assert_eq!(&***first, &[1u8, 2, 3]);
}

#[test]
fn test_tuple_key_is_memoized() {
    let first = Value::from(vec![Value::Int(1), Value::from("x")]);
    let second = Value::from(vec![Value::Int(1), Value::from("x")]);
    assert_eq!(first, second);
    assert_eq!(Key::for_value(&first), Key::for_value(&second));
    let (Value::Tuple(first), Value::Tuple(second)) = (&first, &second) else {
        panic!("expected tuple values");
    };
    assert_eq!(first.key(), second.key());
    assert_eq!(&***first, &[Value::Int(1), Value::from("x")]);
}

#[test]
fn test_tuples_order_by_elements() {
    let mut tuples = vec![
        Value::pair(Value::Int(2), Value::from("a")),
        Value::pair(Value::Int(1), Value::from("b")),
        Value::pair(Value::Int(1), Value::from("a")),
    ];
    tuples.sort();
    assert_eq!(
        tuples,
        vec![
            Value::pair(Value::Int(1), Value::from("a")),
            Value::pair(Value::Int(1), Value::from("b")),
            Value::pair(Value::Int(2), Value::from("a")),
        ]
    );
    // a shorter tuple sorts before its extensions
    assert!(Value::from(vec![Value::Int(1)]) < Value::pair(Value::Int(1), Value::Int(0)));
}

#[test]
fn test_object_field_order_is_canonical() {
    let first = Value::object([
        ("b".into(), Value::Int(2)),
        ("a".into(), Value::Int(1)),
    ]);
    let second = Value::object([
        ("a".into(), Value::Int(1)),
        ("b".into(), Value::Int(2)),
    ]);
    assert_eq!(first, second);
    assert_eq!(Key::for_value(&first), Key::for_value(&second));
    let fields = first.as_object().expect("object value");
    assert_eq!(fields[0].0.as_str(), "a");
    assert_eq!(fields[1].0.as_str(), "b");
}

#[test]
fn test_object_later_duplicates_win() {
    let object = Value::object([
        ("a".into(), Value::Int(1)),
        ("a".into(), Value::Int(2)),
    ]);
    let fields = object.as_object().expect("object value");
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].0.as_str(), "a");
    assert_eq!(fields[0].1, Value::Int(2));
}

#[test]
fn test_as_pair() {
    let pair = Value::pair(Value::Int(1), Value::from("x"));
    let (key, value) = pair.as_pair().expect("two-element tuple");
    assert_eq!(key, &Value::Int(1));
    assert_eq!(value, &Value::from("x"));

    let triple = Value::from(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert!(triple.as_pair().is_none());
    assert!(Value::Int(1).as_pair().is_none());
}

#[test]
fn test_simple_types_and_scalars() {
    assert_eq!(Value::None.simple_type(), SimpleType::None);
    assert_eq!(Value::Int(1).simple_type(), SimpleType::Int);
    assert_eq!(Value::from("x").simple_type(), SimpleType::String);
    assert!(Value::Int(1).is_scalar());
    assert!(Value::from("x").is_scalar());
    assert!(Value::None.is_scalar());
    assert!(!Value::bytes([1u8]).is_scalar());
    assert!(!Value::pair(Value::None, Value::None).is_scalar());
    assert!(!Value::object([]).is_scalar());
}

#[test]
fn test_value_display() {
    assert_eq!(Value::None.to_string(), "None");
    assert_eq!(Value::Bool(true).to_string(), "True");
    assert_eq!(Value::Bool(false).to_string(), "False");
    assert_eq!(Value::Int(-3).to_string(), "-3");
    assert_eq!(Value::from(1.5).to_string(), "1.5");
    assert_eq!(Value::from("x").to_string(), "\"x\"");
    assert_eq!(
        Value::from(vec![Value::Int(1), Value::Int(2)]).to_string(),
        "(1, 2)"
    );
}

#[test]
fn test_json_conversions() {
    let json = serde_json::json!({
        "name": "alice",
        "age": 31,
        "scores": [1, 2.5, null],
        "active": true,
    });
    let value = Value::from_json(&json);
    let fields = value.as_object().expect("object value");
    assert_eq!(fields.len(), 4);
    assert_eq!(value.to_json().expect("JSON-representable value"), json);
}

#[test]
fn test_date_time_values() {
    let parsed =
        DateTime::strptime("2024-03-01 12:30:00", "%Y-%m-%d %H:%M:%S").expect("valid date");
    assert_eq!(parsed.strftime("%Y-%m-%d"), "2024-03-01");
    assert_eq!(parsed, DateTime::new(parsed.timestamp_ns()));

    let value = Value::from(parsed);
    assert_eq!(value.as_date_time().expect("datetime value"), parsed);
    assert_eq!(value.simple_type(), SimpleType::DateTime);

    assert_eq!(
        DateTime::from_timestamp_millis(1_000).timestamp_ns(),
        1_000_000_000
    );
    assert!(DateTime::strptime("not a date", "%Y-%m-%d").is_err());
    assert!(DateTime::now() > DateTime::new(0));
}

#[test]
fn test_from_isize() {
    assert_eq!(Value::from_isize(7), Value::Int(7));
    assert_eq!(Value::from_isize(-7), Value::Int(-7));
}

#[test]
fn test_type_mismatch_error() {
    let value = Value::from("not a number");
    let error = value.as_int().expect_err("string is not an integer");
    assert!(error.to_string().contains("expected integer"));
    // the boxed form converts back to the engine error losslessly
    let error = Error::from(error);
    assert_matches!(
        error,
        Error::TypeMismatch {
            expected: "integer",
            ..
        }
    );
}
