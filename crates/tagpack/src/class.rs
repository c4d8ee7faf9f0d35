//! # Class Descriptors
//!
//! Named record types travel as a class definition (alias plus field names)
//! followed by object bodies that reference the definition by index. The
//! registry caches one descriptor per type, including the precomputed header
//! bytes, so a writer only has to copy them on first use.
//!
//! ## Invariants
//! - **Stable Layout**: a descriptor never changes once built. Field order is
//!   declaration order and object bodies rely on it.
//! - **Header Slots**: field names longer than one UTF-16 unit are written as
//!   full strings and occupy reference slots on the reading side.
//!   `ClassDescriptor::ref_count` records how many, so writers stay in step.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::RwLock;

use crate::tags;
use crate::types::Error;
use crate::types::Result;
use crate::value::FromValue;
use crate::value::Value;
use crate::writer::put_string;
use crate::writer::utf16_len;

/// A struct that serializes as a class-defined object.
///
/// Implement by hand or with [`record!`](crate::record).
pub trait Record: Sized + 'static {
    /// Default class alias on the wire.
    const ALIAS: &'static str;
    /// Field names in declaration order.
    const FIELDS: &'static [&'static str];

    /// Field values, in `FIELDS` order.
    fn to_fields(&self) -> Vec<Value>;

    fn from_fields(fields: &Fields) -> Result<Self>;
}

/// Decoded field values keyed by their Rust field name.
#[derive(Debug, Clone, Default)]
pub struct Fields {
    entries: Vec<(String, Value)>,
}

impl Fields {
    pub fn new(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Converts a field, treating an absent field as null.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        match self.value(name) {
            Some(value) => T::from_value(value),
            None => T::from_value(&Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub wire_name: String,
}

#[derive(Debug)]
pub struct ClassDescriptor {
    alias: String,
    fields: Vec<FieldDescriptor>,
    header: Vec<u8>,
    ref_count: usize,
}

impl ClassDescriptor {
    fn build(alias: &str, fields: Vec<FieldDescriptor>) -> Self {
        let wire: Vec<&str> = fields.iter().map(|f| f.wire_name.as_str()).collect();
        let (header, ref_count) = class_header(alias, &wire);
        Self {
            alias: alias.to_string(),
            fields,
            header,
            ref_count,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// The encoded class definition, ready to copy into a stream.
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Maps a wire field name back to the Rust field name. Exact wire names
    /// win; otherwise names match ignoring ASCII case.
    pub fn field_for_wire(&self, wire: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.wire_name == wire)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(wire)))
            .map(|f| f.name.as_str())
    }
}

/// Encodes `c<len>"alias"<count>{names}` and counts the name slots.
pub(crate) fn class_header(alias: &str, names: &[&str]) -> (Vec<u8>, usize) {
    let mut buf = Vec::with_capacity(alias.len() + 16);
    buf.push(tags::CLASS);
    buf.extend_from_slice(utf16_len(alias).to_string().as_bytes());
    buf.push(tags::QUOTE);
    buf.extend_from_slice(alias.as_bytes());
    buf.push(tags::QUOTE);
    if !names.is_empty() {
        buf.extend_from_slice(names.len().to_string().as_bytes());
    }
    buf.push(tags::OPENBRACE);
    let mut ref_count = 0;
    for name in names {
        if put_string(&mut buf, name) {
            ref_count += 1;
        }
    }
    buf.push(tags::CLOSEBRACE);
    (buf, ref_count)
}

/// Process-wide (or explicitly scoped) cache of class descriptors.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    by_type: RwLock<HashMap<TypeId, Arc<ClassDescriptor>>>,
    by_alias: RwLock<HashMap<String, Arc<ClassDescriptor>>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default registry used by writers and readers that were not
    /// given one.
    pub fn global() -> Arc<ClassRegistry> {
        static GLOBAL: OnceLock<Arc<ClassRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ClassRegistry::new())).clone()
    }

    /// Registers `T` under `alias`, keeping field names as declared.
    pub fn register<T: Record>(&self, alias: &str) -> Arc<ClassDescriptor> {
        self.register_with_names::<T>(alias, &[])
    }

    /// Registers `T` under `alias`, renaming fields on the wire.
    /// `renames` pairs a Rust field name with its wire name.
    pub fn register_with_names<T: Record>(
        &self,
        alias: &str,
        renames: &[(&str, &str)],
    ) -> Arc<ClassDescriptor> {
        let fields = T::FIELDS
            .iter()
            .map(|name| {
                let wire = renames
                    .iter()
                    .find(|(field, _)| field == name)
                    .map(|(_, wire)| *wire)
                    .unwrap_or(*name);
                FieldDescriptor {
                    name: name.to_string(),
                    wire_name: wire.to_string(),
                }
            })
            .collect();
        let descriptor = Arc::new(ClassDescriptor::build(alias, fields));
        self.by_type
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), descriptor.clone());
        self.by_alias
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(alias.to_string(), descriptor.clone());
        tracing::debug!(alias, "registered class");
        descriptor
    }

    /// The descriptor for `T`, built from its defaults on first use.
    pub fn descriptor<T: Record>(&self) -> Arc<ClassDescriptor> {
        let found = self
            .by_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .cloned();
        match found {
            Some(descriptor) => descriptor,
            None => self.register::<T>(T::ALIAS),
        }
    }

    pub fn by_alias(&self, alias: &str) -> Option<Arc<ClassDescriptor>> {
        self.by_alias
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .cloned()
    }

    pub fn is_registered<T: Record>(&self) -> bool {
        self.by_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&TypeId::of::<T>())
    }
}

/// Converts a decoded object (or string-keyed map) into a record, resolving
/// wire names through `registry`.
pub fn record_from_value_in<T: Record>(registry: &ClassRegistry, value: &Value) -> Result<T> {
    let descriptor = registry.descriptor::<T>();
    let pairs: Vec<(String, Value)> = match value {
        Value::Object(obj) => obj.fields(),
        Value::Map(map) => map
            .snapshot()
            .into_iter()
            .filter_map(|(k, v)| match k {
                Value::String(k) => Some((k, v)),
                _ => None,
            })
            .collect(),
        other => {
            return Err(Error::CastValue { kind: other.kind(), target: T::ALIAS });
        }
    };
    let entries = pairs
        .into_iter()
        .filter_map(|(wire, v)| {
            descriptor
                .field_for_wire(&wire)
                .map(|name| (name.to_string(), v))
        })
        .collect();
    T::from_fields(&Fields::new(entries))
}

pub fn record_from_value<T: Record>(value: &Value) -> Result<T> {
    record_from_value_in(&ClassRegistry::global(), value)
}

/// Builds the dynamic object form of a record, naming it and its fields
/// through `registry`.
pub fn record_to_value_in<T: Record>(registry: &ClassRegistry, record: &T) -> Value {
    let descriptor = registry.descriptor::<T>();
    let fields = descriptor
        .fields()
        .iter()
        .map(|f| f.wire_name.clone())
        .zip(record.to_fields())
        .collect();
    Value::Object(crate::value::Object::with_fields(descriptor.alias(), fields))
}

pub fn record_to_value<T: Record>(record: &T) -> Value {
    record_to_value_in(&ClassRegistry::global(), record)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point {
        x: i32,
        y: i32,
    }

    impl Record for Point {
        const ALIAS: &'static str = "Point";
        const FIELDS: &'static [&'static str] = &["x", "y"];

        fn to_fields(&self) -> Vec<Value> {
            vec![self.x.into(), self.y.into()]
        }

        fn from_fields(fields: &Fields) -> Result<Self> {
            Ok(Self { x: fields.get("x")?, y: fields.get("y")? })
        }
    }

    #[test]
    fn header_bytes() {
        let (header, refs) = class_header("Point", &["x", "yy"]);
        assert_eq!(header, b"c5\"Point\"2{uxs2\"yy\"}");
        assert_eq!(refs, 1);
    }

    #[test]
    fn empty_class_omits_count() {
        let (header, refs) = class_header("E", &[]);
        assert_eq!(header, b"c1\"E\"{}");
        assert_eq!(refs, 0);
    }

    #[test]
    fn lazy_descriptor_then_rename() {
        let registry = ClassRegistry::new();
        assert!(!registry.is_registered::<Point>());
        let lazy = registry.descriptor::<Point>();
        assert_eq!(lazy.alias(), "Point");
        let renamed = registry.register_with_names::<Point>("Pt", &[("x", "X")]);
        assert_eq!(renamed.fields()[0].wire_name, "X");
        assert_eq!(renamed.field_for_wire("X"), Some("x"));
        assert_eq!(renamed.field_for_wire("Y"), Some("y"));
        assert!(registry.by_alias("Pt").is_some());
    }

    #[test]
    fn record_from_map_and_object() {
        let registry = ClassRegistry::new();
        let map = crate::value::Map::new();
        map.insert("X", 3);
        map.insert("y", "4");
        let p: Point = record_from_value_in(&registry, &Value::Map(map)).unwrap();
        assert_eq!((p.x, p.y), (3, 4));

        let missing = crate::value::Object::with_fields("Point", vec![("x".into(), 1.into())]);
        let p: Point = record_from_value_in(&registry, &Value::Object(missing)).unwrap();
        assert_eq!((p.x, p.y), (1, 0));
    }
}
