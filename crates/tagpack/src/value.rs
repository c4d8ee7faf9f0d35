//! # Dynamic Values
//!
//! `Value` is what the reader materializes when the caller has no typed
//! destination, and what the RPC layer passes through its middleware.
//!
//! ## Invariants
//! - **Identity**: `List`, `Map` and `Object` are shared handles. Cloning a
//!   handle aliases the same storage, so a graph decoded from back-references
//!   keeps its sharing (and its cycles).
//! - **Value Semantics Elsewhere**: strings, bytes, numbers, dates and GUIDs
//!   are plain values; a reference to one of them yields a copy.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::types::Error;
use crate::types::Result;

/// Nesting depth at which `Debug` output is elided.
const DEBUG_DEPTH: usize = 8;

/// A decoded (or to-be-encoded) value of any wire type.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// An integer outside the `i64` range, kept as its decimal text.
    BigInt(String),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Guid(Uuid),
    DateTime(Timestamp),
    List(List),
    Map(Map),
    Object(Object),
}

impl Value {
    /// Short name of the value's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Guid(_) => "guid",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Builds a list value from anything convertible.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
        Value::List(List::from_vec(items.into_iter().map(Into::into).collect()))
    }

    /// Converts into a typed destination, coercing across kinds.
    pub fn cast<T: FromValue>(&self) -> Result<T> {
        T::from_value(self)
    }

    fn fmt_depth(&self, f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
        if depth > DEBUG_DEPTH {
            return write!(f, "…");
        }
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({})", v),
            Value::Int(v) => write!(f, "Int({})", v),
            Value::BigInt(v) => write!(f, "BigInt({})", v),
            Value::Double(v) => write!(f, "Double({:?})", v),
            Value::String(v) => write!(f, "String({:?})", v),
            Value::Bytes(v) => write!(f, "Bytes({:?})", v),
            Value::Guid(v) => write!(f, "Guid({})", v),
            Value::DateTime(v) => write!(f, "DateTime({:?})", v),
            Value::List(list) => {
                write!(f, "List[")?;
                for (i, item) in list.snapshot().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_depth(f, depth + 1)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "Map{{")?;
                for (i, (k, v)) in map.snapshot().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    k.fmt_depth(f, depth + 1)?;
                    write!(f, ": ")?;
                    v.fmt_depth(f, depth + 1)?;
                }
                write!(f, "}}")
            }
            Value::Object(obj) => {
                write!(f, "{}{{", obj.alias())?;
                for (i, (k, v)) in obj.fields().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", k)?;
                    v.fmt_depth(f, depth + 1)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_depth(f, 0)
    }
}

/// Structural equality. Handles that alias the same storage are equal
/// without descending. A pair of handles already under comparison is taken
/// as equal, so two copies of the same cyclic graph compare equal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_tracked(other, &mut HashSet::new())
    }
}

impl Value {
    fn eq_tracked(&self, other: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if a.ptr_eq(b) || !seen.insert((a.id(), b.id())) {
                    return true;
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| x.eq_tracked(y, seen))
            }
            (Value::Map(a), Value::Map(b)) => {
                if a.ptr_eq(b) || !seen.insert((a.id(), b.id())) {
                    return true;
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len()
                    && a.iter()
                        .zip(&b)
                        .all(|((ka, va), (kb, vb))| ka.eq_tracked(kb, seen) && va.eq_tracked(vb, seen))
            }
            (Value::Object(a), Value::Object(b)) => {
                if a.ptr_eq(b) || !seen.insert((a.id(), b.id())) {
                    return true;
                }
                if a.alias() != b.alias() {
                    return false;
                }
                let (a, b) = (a.fields(), b.fields());
                a.len() == b.len()
                    && a.iter()
                        .zip(&b)
                        .all(|((na, va), (nb, vb))| na == nb && va.eq_tracked(vb, seen))
            }
            _ => false,
        }
    }
}

// ============================================================================
//  SHARED HANDLES
// ============================================================================

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A shared, growable list.
#[derive(Clone, Default)]
pub struct List(Arc<RwLock<Vec<Value>>>);

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn push(&self, item: impl Into<Value>) {
        write_lock(&self.0).push(item.into());
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        read_lock(&self.0).get(index).cloned()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the elements out. The copy shares nested handles.
    pub fn snapshot(&self) -> Vec<Value> {
        read_lock(&self.0).clone()
    }

    /// Replaces the contents wholesale.
    pub fn replace(&self, items: Vec<Value>) {
        *write_lock(&self.0) = items;
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the underlying storage.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

/// A shared map with arbitrary keys, in insertion (wire) order.
#[derive(Clone, Default)]
pub struct Map(Arc<RwLock<Vec<(Value, Value)>>>);

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(Value, Value)>) -> Self {
        Self(Arc::new(RwLock::new(entries)))
    }

    /// Inserts or overwrites the entry for `key`.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let mut entries = write_lock(&self.0);
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            entries.push((key, value));
        }
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        read_lock(&self.0).iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        read_lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        read_lock(&self.0).clone()
    }

    pub fn replace(&self, entries: Vec<(Value, Value)>) {
        *write_lock(&self.0) = entries;
    }

    pub fn ptr_eq(&self, other: &Map) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

#[derive(Default)]
struct ObjectData {
    alias: String,
    fields: Vec<(String, Value)>,
}

/// A shared instance of a named class: an alias and ordered named fields.
#[derive(Clone, Default)]
pub struct Object(Arc<RwLock<ObjectData>>);

impl Object {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(ObjectData {
            alias: alias.into(),
            fields: Vec::new(),
        })))
    }

    pub fn with_fields(alias: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self(Arc::new(RwLock::new(ObjectData {
            alias: alias.into(),
            fields,
        })))
    }

    pub fn alias(&self) -> String {
        read_lock(&self.0).alias.clone()
    }

    pub fn field_names(&self) -> Vec<String> {
        read_lock(&self.0).fields.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn fields(&self) -> Vec<(String, Value)> {
        read_lock(&self.0).fields.clone()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        read_lock(&self.0).fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    /// Sets a field, appending it if the class has no such field yet.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut data = write_lock(&self.0);
        if let Some(slot) = data.fields.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value;
        } else {
            data.fields.push((name.to_string(), value));
        }
    }

    pub(crate) fn replace_fields(&self, fields: Vec<(String, Value)>) {
        write_lock(&self.0).fields = fields;
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

// ============================================================================
//  SCALAR COMPANIONS
// ============================================================================

/// A date-time as carried on the wire: calendar fields plus a UTC marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub naive: NaiveDateTime,
    pub utc: bool,
}

impl Timestamp {
    pub fn local(naive: NaiveDateTime) -> Self {
        Self { naive, utc: false }
    }

    pub fn utc(naive: NaiveDateTime) -> Self {
        Self { naive, utc: true }
    }
}

/// A complex number. Zero imaginary parts travel as a plain double.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

/// A byte blob. Wraps `Vec<u8>` so it encodes as bytes rather than a list
/// of small integers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ByteBuf(pub Vec<u8>);

// ============================================================================
//  INTO VALUE
// ============================================================================

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self { Value::Int(v as i64) }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::BigInt(v.to_string()),
        }
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::from(v as u64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ByteBuf> for Value {
    fn from(v: ByteBuf) -> Self {
        Value::Bytes(v.0)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(Timestamp::local(v))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(Timestamp::utc(v.naive_utc()))
    }
}

impl From<Complex> for Value {
    fn from(v: Complex) -> Self {
        if v.im == 0.0 {
            Value::Double(v.re)
        } else {
            Value::list([v.re, v.im])
        }
    }
}

impl From<List> for Value {
    fn from(v: List) -> Self {
        Value::List(v)
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v)
    }
}

impl<K: Into<Value>, V: Into<Value>> From<HashMap<K, V>> for Value {
    fn from(v: HashMap<K, V>) -> Self {
        Value::Map(Map::from_entries(
            v.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}

impl<K: Into<Value>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(v: BTreeMap<K, V>) -> Self {
        Value::Map(Map::from_entries(
            v.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}

// ============================================================================
//  FROM VALUE (coercive)
// ============================================================================

/// Conversion from a materialized value into a typed destination.
///
/// Conversions are lenient: numbers, booleans and strings convert into each
/// other through their canonical text, mirroring what the stream decoders
/// accept for the same target.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn cast_err<T>(value: &Value, target: &'static str) -> Result<T> {
    Err(Error::CastValue { kind: value.kind(), target })
}

fn parse_number<T: std::str::FromStr>(text: &str, target: &'static str) -> Result<T> {
    text.trim().parse::<T>().map_err(|_| Error::NumberOutOfRange {
        value: text.to_string(),
        target,
    })
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(false),
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            Value::BigInt(_) => Ok(true),
            Value::Double(v) => Ok(*v != 0.0),
            Value::String(s) => match s.as_str() {
                "" | "false" | "0" => Ok(false),
                "true" | "1" => Ok(true),
                other => parse_number::<f64>(other, "bool").map(|f| f != 0.0),
            },
            _ => cast_err(value, "bool"),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(0),
            Value::Bool(v) => Ok(*v as i64),
            Value::Int(v) => Ok(*v),
            Value::BigInt(s) => parse_number(s, "i64"),
            Value::Double(v) => Ok(*v as i64),
            Value::String(s) if s.is_empty() => Ok(0),
            Value::String(s) => parse_number(s, "i64"),
            Value::DateTime(ts) => Ok(ts.naive.and_utc().timestamp()),
            _ => cast_err(value, "i64"),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::BigInt(s) => parse_number(s, "u64"),
            Value::String(s) if !s.is_empty() => parse_number(s, "u64"),
            other => {
                let v = i64::from_value(other)?;
                u64::try_from(v).map_err(|_| Error::NumberOutOfRange {
                    value: v.to_string(),
                    target: "u64",
                })
            }
        }
    }
}

macro_rules! from_value_narrow {
    ($wide:ty => $($ty:ty),*) => {
        $(impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                let wide = <$wide>::from_value(value)?;
                <$ty>::try_from(wide).map_err(|_| Error::NumberOutOfRange {
                    value: wide.to_string(),
                    target: stringify!($ty),
                })
            }
        })*
    };
}

from_value_narrow!(i64 => i8, i16, i32, isize);
from_value_narrow!(u64 => u8, u16, u32, usize);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(0.0),
            Value::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Value::Int(v) => Ok(*v as f64),
            Value::BigInt(s) => parse_number(s, "f64"),
            Value::Double(v) => Ok(*v),
            Value::String(s) if s.is_empty() => Ok(0.0),
            Value::String(s) => parse_number(s, "f64"),
            _ => cast_err(value, "f64"),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for Complex {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::List(list) => {
                let items = list.snapshot();
                match items.as_slice() {
                    [re] => Ok(Complex::new(f64::from_value(re)?, 0.0)),
                    [re, im] => Ok(Complex::new(f64::from_value(re)?, f64::from_value(im)?)),
                    _ => cast_err(value, "complex"),
                }
            }
            other => Ok(Complex::new(f64::from_value(other)?, 0.0)),
        }
    }
}

/// Canonical text of a scalar value, as string targets see it.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(v) => Some(v.to_string()),
        Value::Int(v) => Some(v.to_string()),
        Value::BigInt(s) => Some(s.clone()),
        Value::Double(v) => Some(crate::writer::format_double(*v)),
        Value::String(s) => Some(s.clone()),
        Value::Bytes(b) => String::from_utf8(b.clone()).ok(),
        Value::Guid(g) => Some(g.to_string()),
        Value::DateTime(ts) => Some(format_timestamp(ts)),
        _ => None,
    }
}

fn format_timestamp(ts: &Timestamp) -> String {
    let text = ts.naive.format("%Y-%m-%d %H:%M:%S%.f").to_string();
    if ts.utc { format!("{}Z", text) } else { text }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value_text(value) {
            Some(text) => Ok(text),
            None => cast_err(value, "string"),
        }
    }
}

impl FromValue for ByteBuf {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(ByteBuf::default()),
            Value::Bytes(b) => Ok(ByteBuf(b.clone())),
            Value::String(s) => Ok(ByteBuf(s.as_bytes().to_vec())),
            Value::List(_) => Vec::<u8>::from_value(value).map(ByteBuf),
            _ => cast_err(value, "bytes"),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Guid(g) => Ok(*g),
            Value::String(s) => Uuid::parse_str(s)
                .map_err(|_| Error::Malformed(format!("bad guid {:?}", s))),
            Value::Bytes(b) => Uuid::from_slice(b)
                .map_err(|_| Error::Malformed("guid bytes must be 16 long".into())),
            _ => cast_err(value, "guid"),
        }
    }
}

impl FromValue for Timestamp {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::DateTime(ts) => Ok(*ts),
            Value::Int(secs) => DateTime::from_timestamp(*secs, 0)
                .map(|dt| Timestamp::utc(dt.naive_utc()))
                .ok_or_else(|| Error::NumberOutOfRange { value: secs.to_string(), target: "datetime" }),
            Value::String(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .map(Timestamp::local)
                .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(|d| Timestamp::local(d.and_time(chrono::NaiveTime::MIN))))
                .map_err(|_| Error::Malformed(format!("bad date {:?}", s))),
            _ => cast_err(value, "datetime"),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        Timestamp::from_value(value).map(|ts| ts.naive)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        Timestamp::from_value(value).map(|ts| ts.naive.and_utc())
    }
}

impl FromValue for List {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::List(list) => Ok(list.clone()),
            Value::Null => Ok(List::new()),
            _ => cast_err(value, "list"),
        }
    }
}

impl FromValue for Map {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Map(map) => Ok(map.clone()),
            Value::Null => Ok(Map::new()),
            _ => cast_err(value, "map"),
        }
    }
}

impl FromValue for Object {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(obj) => Ok(obj.clone()),
            _ => cast_err(value, "object"),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self> {
        let mut out = Vec::new();
        fill_vec(&mut out, value)?;
        Ok(out)
    }
}

/// Fills `dest` from a list-like value, reusing its allocation.
pub fn fill_vec<T: FromValue>(dest: &mut Vec<T>, value: &Value) -> Result<()> {
    dest.clear();
    match value {
        Value::Null => Ok(()),
        Value::List(list) => {
            let items = list.snapshot();
            dest.reserve(items.len());
            for item in &items {
                dest.push(T::from_value(item)?);
            }
            Ok(())
        }
        Value::Bytes(bytes) => {
            dest.reserve(bytes.len());
            for b in bytes {
                dest.push(T::from_value(&Value::Int(*b as i64))?);
            }
            Ok(())
        }
        Value::String(s) if s.is_empty() => Ok(()),
        _ => cast_err(value, "list"),
    }
}

impl<T: FromValue + Default, const N: usize> FromValue for [T; N] {
    fn from_value(value: &Value) -> Result<Self> {
        let items: Vec<Value> = match value {
            Value::List(list) => list.snapshot(),
            Value::Bytes(bytes) => bytes.iter().map(|b| Value::Int(*b as i64)).collect(),
            Value::Null => Vec::new(),
            _ => return cast_err(value, "array"),
        };
        let mut out: [T; N] = std::array::from_fn(|_| T::default());
        // Elements past N are dropped, shorter input leaves defaults.
        for (slot, item) in out.iter_mut().zip(items.iter()) {
            *slot = T::from_value(item)?;
        }
        Ok(out)
    }
}

fn map_entries(value: &Value, target: &'static str) -> Result<Vec<(Value, Value)>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Map(map) => Ok(map.snapshot()),
        Value::Object(obj) => Ok(obj
            .fields()
            .into_iter()
            .map(|(k, v)| (Value::String(k), v))
            .collect()),
        Value::List(list) => Ok(list
            .snapshot()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as i64), v))
            .collect()),
        _ => cast_err(value, target),
    }
}

impl<K: FromValue + Eq + Hash, V: FromValue> FromValue for HashMap<K, V> {
    fn from_value(value: &Value) -> Result<Self> {
        let entries = map_entries(value, "map")?;
        let mut out = HashMap::with_capacity(entries.len());
        for (k, v) in &entries {
            out.insert(K::from_value(k)?, V::from_value(v)?);
        }
        Ok(out)
    }
}

impl<K: FromValue + Ord, V: FromValue> FromValue for BTreeMap<K, V> {
    fn from_value(value: &Value) -> Result<Self> {
        let entries = map_entries(value, "map")?;
        let mut out = BTreeMap::new();
        for (k, v) in &entries {
            out.insert(K::from_value(k)?, V::from_value(v)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_alias_storage() {
        let list = List::new();
        let alias = list.clone();
        alias.push(1);
        assert_eq!(list.len(), 1);
        assert!(list.ptr_eq(&alias));
    }

    #[test]
    fn self_referencing_list_compares_and_prints() {
        let list = List::new();
        list.push(Value::List(list.clone()));
        let value = Value::List(list.clone());
        assert_eq!(value, value.clone());
        let printed = format!("{:?}", value);
        assert!(printed.contains('…'));
    }

    #[test]
    fn coercion_to_string() {
        assert_eq!(String::from_value(&Value::Int(42)).unwrap(), "42");
        assert_eq!(String::from_value(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(String::from_value(&Value::Double(1.5)).unwrap(), "1.5");
        assert!(String::from_value(&Value::list([1])).is_err());
    }

    #[test]
    fn coercion_to_numbers() {
        assert_eq!(i64::from_value(&Value::from("12")).unwrap(), 12);
        assert_eq!(i32::from_value(&Value::Bool(true)).unwrap(), 1);
        assert!(u8::from_value(&Value::Int(300)).is_err());
        assert!(u64::from_value(&Value::Int(-1)).is_err());
        assert_eq!(u64::from_value(&Value::from(u64::MAX)).unwrap(), u64::MAX);
    }

    #[test]
    fn fixed_array_tolerates_length_mismatch() {
        let short: [i32; 3] = Value::list([1, 2]).cast().unwrap();
        assert_eq!(short, [1, 2, 0]);
        let long: [i32; 2] = Value::list([1, 2, 3]).cast().unwrap();
        assert_eq!(long, [1, 2]);
    }

    #[test]
    fn fill_vec_reuses_capacity() {
        let mut dest: Vec<i64> = Vec::with_capacity(16);
        let before = dest.capacity();
        fill_vec(&mut dest, &Value::list([1, 2, 3])).unwrap();
        assert_eq!(dest, vec![1, 2, 3]);
        assert_eq!(dest.capacity(), before);
    }

    #[test]
    fn bytes_convert_to_numeric_lists() {
        let v: Vec<u16> = Value::Bytes(vec![1, 2]).cast().unwrap();
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn complex_degrades_to_double() {
        assert_eq!(Value::from(Complex::new(2.0, 0.0)), Value::Double(2.0));
        assert_eq!(Value::from(Complex::new(2.0, 1.0)), Value::list([2.0, 1.0]));
    }
}
