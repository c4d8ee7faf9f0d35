use std::collections::HashMap;
use std::sync::Arc;

use super::Result;
use super::serialize;
use super::serialize_simple;
use super::unserialize;
use crate::ByteBuf;
use crate::ClassRegistry;
use crate::List;
use crate::Map;
use crate::Object;
use crate::Reader;
use crate::Value;
use crate::Writer;
use crate::types::Error;

type R<T> = Result<T>;

#[derive(Debug, Clone, PartialEq, Default)]
struct Point {
    x: i32,
    y: i32,
}

crate::record!(Point as "Point" { x, y });

#[derive(Debug, Clone, PartialEq, Default)]
struct Pair {
    left: String,
    right: Vec<i64>,
}

crate::record!(Pair as "Pair" { left, right });

#[derive(Debug, Clone, PartialEq, Default)]
struct Line {
    from: Point,
    to: Point,
}

crate::record!(Line as "Line" { from, to });

fn roundtrip(value: Value) -> R<()> {
    let bytes = serialize(&value)?;
    let back: Value = unserialize(&bytes)?;
    assert_eq!(back, value, "bytes: {:?}", String::from_utf8_lossy(&bytes));
    Ok(())
}

#[test]
fn test_scalar_roundtrip() -> R<()> {
    roundtrip(Value::Null)?;
    roundtrip(Value::Bool(true))?;
    roundtrip(Value::Bool(false))?;
    for v in [0, 9, 10, -1, i32::MIN as i64, i32::MAX as i64, i32::MAX as i64 + 1, i64::MIN, i64::MAX] {
        roundtrip(Value::Int(v))?;
    }
    for v in [0.5, -1.25, 1e300, 1e-300, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        roundtrip(Value::Double(v))?;
    }
    roundtrip(Value::from(""))?;
    roundtrip(Value::from("x"))?;
    roundtrip(Value::from("héllo wörld 😀"))?;
    roundtrip(Value::Bytes(vec![0, b'"', b'}', 255]))?;
    roundtrip(Value::Bytes(vec![]))?;
    Ok(())
}

#[test]
fn test_typed_roundtrip() -> R<()> {
    let bytes = serialize(&u64::MAX)?;
    assert_eq!(unserialize::<u64>(&bytes)?, u64::MAX);

    let mut scores = HashMap::new();
    scores.insert("alice".to_string(), 3i32);
    scores.insert("bob".to_string(), 12i32);
    let bytes = serialize(&scores)?;
    assert_eq!(unserialize::<HashMap<String, i32>>(&bytes)?, scores);

    let nested = vec![vec![1i64, 2], vec![], vec![3]];
    let bytes = serialize(&nested)?;
    assert_eq!(unserialize::<Vec<Vec<i64>>>(&bytes)?, nested);

    let maybe: Vec<Option<String>> = vec![Some("a".into()), None];
    let bytes = serialize(&maybe)?;
    assert_eq!(unserialize::<Vec<Option<String>>>(&bytes)?, maybe);
    Ok(())
}

#[test]
fn test_small_int_compaction() -> R<()> {
    for v in 0..=9i64 {
        assert_eq!(serialize(&v)?.len(), 1);
    }
    assert_eq!(serialize(&10i32)?, b"i10;");
    let above = serialize(&(i32::MAX as i64 + 1))?;
    assert_eq!(above[0], b'l');
    Ok(())
}

#[test]
fn test_shared_list_is_back_reference() -> R<()> {
    let shared = List::from_vec(vec![Value::Int(1), Value::Int(2)]);
    let outer = Value::list([Value::List(shared.clone()), Value::List(shared)]);
    let bytes = serialize(&outer)?;
    assert_eq!(bytes, b"a2{a2{12}r1;}");

    let back: Value = unserialize(&bytes)?;
    let Value::List(outer) = back else { panic!("expected list") };
    let (Some(Value::List(a)), Some(Value::List(b))) = (outer.get(0), outer.get(1)) else {
        panic!("expected two lists");
    };
    assert!(a.ptr_eq(&b));
    a.push(3);
    assert_eq!(b.len(), 3);
    Ok(())
}

#[test]
fn test_simple_mode_duplicates() -> R<()> {
    let shared = List::from_vec(vec![Value::Int(1)]);
    let outer = Value::list([Value::List(shared.clone()), Value::List(shared)]);
    let bytes = serialize_simple(&outer)?;
    assert_eq!(bytes, b"a2{a1{1}a1{1}}");

    let back = Reader::simple(&bytes).read_value()?;
    let Value::List(outer) = back else { panic!("expected list") };
    let (Some(Value::List(a)), Some(Value::List(b))) = (outer.get(0), outer.get(1)) else {
        panic!("expected two lists");
    };
    assert!(!a.ptr_eq(&b));
    assert_eq!(Reader::simple(b"r0;").read_value(), Err(Error::UnresolvedRef(0)));
    Ok(())
}

#[test]
fn test_cyclic_list() -> R<()> {
    let list = List::new();
    list.push(Value::List(list.clone()));
    let bytes = serialize(&Value::List(list.clone()))?;
    assert_eq!(bytes, b"a1{r0;}");
    list.replace(vec![]);

    let back: Value = unserialize(&bytes)?;
    let Value::List(decoded) = back else { panic!("expected list") };
    let Some(Value::List(inner)) = decoded.get(0) else { panic!("expected inner list") };
    assert!(inner.ptr_eq(&decoded));
    decoded.replace(vec![]);
    Ok(())
}

#[test]
fn test_cyclic_map_and_object() -> R<()> {
    let map = Map::new();
    map.insert("self", Value::Map(map.clone()));
    let bytes = serialize(&Value::Map(map.clone()))?;
    assert_eq!(bytes, b"m1{s4\"self\"r0;}");
    map.replace(vec![]);

    let node = Object::new("Node");
    node.set("next", Value::Object(node.clone()));
    let bytes = serialize(&Value::Object(node.clone()))?;
    // The field name takes slot 0, the object slot 1.
    assert_eq!(bytes, b"c4\"Node\"1{s4\"next\"}o0{r1;}");
    node.replace_fields(vec![]);

    let back: Value = unserialize(&bytes)?;
    let Value::Object(decoded) = back else { panic!("expected object") };
    assert_eq!(decoded.alias(), "Node");
    let Some(Value::Object(next)) = decoded.get("next") else { panic!("expected object") };
    assert!(next.ptr_eq(&decoded));
    decoded.replace_fields(vec![]);
    Ok(())
}

#[test]
fn test_struct_class_emitted_once() -> R<()> {
    let points = vec![Point { x: 1, y: 2 }, Point { x: 3, y: 4 }];
    let bytes = serialize(&points)?;
    assert_eq!(bytes, b"a2{c5\"Point\"2{uxuy}o0{12}o0{34}}");
    assert_eq!(unserialize::<Vec<Point>>(&bytes)?, points);
    Ok(())
}

#[test]
fn test_nested_records() -> R<()> {
    let line = Line {
        from: Point { x: 0, y: 0 },
        to: Point { x: 10, y: -5 },
    };
    let bytes = serialize(&line)?;
    assert_eq!(unserialize::<Line>(&bytes)?, line);

    let pair = Pair { left: "hello".into(), right: vec![7, 8, 9] };
    let bytes = serialize(&vec![pair.clone(), pair.clone()])?;
    assert_eq!(unserialize::<Vec<Pair>>(&bytes)?, vec![pair.clone(), pair]);
    Ok(())
}

#[test]
fn test_record_rename_with_scoped_registry() -> R<()> {
    let registry = Arc::new(ClassRegistry::new());
    registry.register_with_names::<Point>("geo.Point", &[("x", "lon"), ("y", "lat")]);

    let mut writer = Writer::with_registry(registry.clone(), false);
    writer.write(&Point { x: 5, y: 6 })?;
    let bytes = writer.into_bytes();
    assert_eq!(bytes, b"c9\"geo.Point\"2{s3\"lon\"s3\"lat\"}o0{56}");

    let mut reader = Reader::with_registry(&bytes, registry.clone(), false);
    assert_eq!(reader.read::<Point>()?, Point { x: 5, y: 6 });

    let dynamic: Value = unserialize(&bytes)?;
    let Value::Object(obj) = dynamic else { panic!("expected object") };
    assert_eq!(obj.field_names(), vec!["lon".to_string(), "lat".to_string()]);
    Ok(())
}

#[test]
fn test_record_from_map() -> R<()> {
    let bytes = b"m2{uxi10;uyi20;}";
    assert_eq!(unserialize::<Point>(bytes)?, Point { x: 10, y: 20 });
    Ok(())
}

#[test]
fn test_raw_read_preserves_span() -> R<()> {
    let lines = vec![
        Line { from: Point { x: 1, y: 2 }, to: Point { x: 3, y: 4 } },
        Line::default(),
    ];
    let mut writer = Writer::new();
    writer.write(&lines)?;
    writer.write(&7i32)?;
    let bytes = writer.into_bytes();

    let mut reader = Reader::new(&bytes);
    let raw = reader.read_raw()?;
    assert_eq!(raw, &bytes[..bytes.len() - 1]);
    assert_eq!(reader.read::<i32>()?, 7);
    assert_eq!(unserialize::<Vec<Line>>(raw)?, lines);
    Ok(())
}

#[test]
fn test_fixed_array_length_mismatch() -> R<()> {
    let bytes = serialize(&vec![1i32, 2, 3, 4])?;
    let short: [i32; 2] = unserialize(&bytes)?;
    assert_eq!(short, [1, 2]);
    let long: [i32; 6] = unserialize(&bytes)?;
    assert_eq!(long, [1, 2, 3, 4, 0, 0]);
    Ok(())
}

#[test]
fn test_bytes_and_lists_interchange() -> R<()> {
    let bytes = serialize(&ByteBuf(vec![1, 2, 3]))?;
    assert_eq!(unserialize::<Vec<u8>>(&bytes)?, vec![1, 2, 3]);
    let list = serialize(&vec![1u8, 2, 3])?;
    assert_eq!(unserialize::<ByteBuf>(&list)?, ByteBuf(vec![1, 2, 3]));
    Ok(())
}

#[test]
fn test_string_coercions() -> R<()> {
    let values = Value::list([
        Value::Int(5),
        Value::Int(123),
        Value::Bool(false),
        Value::Double(2.5),
    ]);
    let bytes = serialize(&values)?;
    let texts: Vec<String> = unserialize(&bytes)?;
    assert_eq!(texts, vec!["5", "123", "false", "2.5"]);
    assert!(matches!(
        unserialize::<String>(b"a{}"),
        Err(Error::CastTag { tag: b'a', target: "string" })
    ));
    Ok(())
}

#[test]
fn test_reset_between_messages() -> R<()> {
    let mut writer = Writer::new();
    writer.write("repeated")?;
    let first = writer.take_bytes();
    writer.reset();
    writer.write("repeated")?;
    let second = writer.take_bytes();
    assert_eq!(first, second);

    let mut stream = Writer::new();
    stream.write("repeated")?;
    stream.write("repeated")?;
    assert_eq!(stream.as_bytes(), b"s8\"repeated\"r0;");
    Ok(())
}

#[test]
fn test_negative_zero_keeps_sign() -> R<()> {
    let bytes = serialize(&Value::Double(-0.0))?;
    assert_eq!(bytes, b"d-0;");
    let Value::Double(back) = unserialize::<Value>(&bytes)? else { panic!("expected double") };
    assert!(back == 0.0 && back.is_sign_negative());
    assert_eq!(serialize(&Value::Double(0.0))?, b"d0;");
    Ok(())
}

fn nest(depth: usize) -> Value {
    let mut value = Value::Int(7);
    for _ in 0..depth {
        value = Value::list([value]);
    }
    value
}

#[test]
fn test_deep_nesting() -> R<()> {
    let deep = nest(100);
    let bytes = serialize(&deep)?;
    assert_eq!(unserialize::<Value>(&bytes)?, deep);
    assert_eq!(Reader::simple(&serialize_simple(&deep)?).read_value()?, deep);

    let too_deep = nest(crate::writer::MAX_DEPTH + 1);
    assert_eq!(serialize(&too_deep), Err(Error::RecursionLimitExceeded));
    let hostile = format!("{}{}", "a1{".repeat(300), "}".repeat(300));
    assert_eq!(unserialize::<Value>(hostile.as_bytes()), Err(Error::RecursionLimitExceeded));
    Ok(())
}

#[test]
fn test_simple_mode_rejects_cycle() -> R<()> {
    let list = List::new();
    list.push(Value::List(list.clone()));
    assert_eq!(serialize_simple(&Value::List(list.clone())), Err(Error::RecursionLimitExceeded));
    list.replace(vec![]);
    Ok(())
}

#[test]
fn test_separate_cyclic_decodes_compare_equal() -> R<()> {
    let list = List::new();
    list.push(Value::Int(1));
    list.push(Value::List(list.clone()));
    let bytes = serialize(&Value::List(list.clone()))?;
    list.replace(vec![]);

    let first: Value = unserialize(&bytes)?;
    let second: Value = unserialize(&bytes)?;
    assert_eq!(first, second);

    let node = Object::new("Node");
    node.set("next", Value::Object(node.clone()));
    let bytes = serialize(&Value::Object(node.clone()))?;
    node.replace_fields(vec![]);
    let third: Value = unserialize(&bytes)?;
    let fourth: Value = unserialize(&bytes)?;
    assert_eq!(third, fourth);
    assert_ne!(first, third);

    for value in [first, second] {
        if let Value::List(l) = value {
            l.replace(vec![]);
        }
    }
    for value in [third, fourth] {
        if let Value::Object(o) = value {
            o.replace_fields(vec![]);
        }
    }
    Ok(())
}

#[test]
fn test_record_value_uses_writer_registry() -> R<()> {
    let registry = Arc::new(ClassRegistry::new());
    registry.register_with_names::<Point>("geo.Point", &[("x", "lon"), ("y", "lat")]);

    let mut writer = Writer::with_registry(registry.clone(), false);
    let value = writer.record_value(&Point { x: 5, y: 6 });
    let Value::Object(obj) = &value else { panic!("expected object") };
    assert_eq!(obj.alias(), "geo.Point");
    assert_eq!(obj.field_names(), vec!["lon".to_string(), "lat".to_string()]);

    writer.write_value(&value)?;
    let bytes = writer.into_bytes();
    let mut reader = Reader::with_registry(&bytes, registry.clone(), false);
    assert_eq!(reader.read::<Point>()?, Point { x: 5, y: 6 });
    Ok(())
}
