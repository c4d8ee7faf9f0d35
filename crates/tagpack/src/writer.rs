//! # Writer
//!
//! Serializes values into the tag format, tracking a reference table so
//! shared and cyclic graphs are written once and referenced afterwards.
//!
//! ## Invariants
//! - **Slot Parity**: the writer counts a reference slot for every unit the
//!   reader registers (long strings, bytes, GUIDs, dates, lists, maps,
//!   objects and class field names), in stream order. Only strings and shared
//!   handles are ever written as back references, but every slot is counted.
//! - **Register Before Body**: composites take their slot before their
//!   elements are written, so a self reference inside the body resolves.
//! - **Stable Identity**: every handle keyed by address is kept alive until
//!   the next reset, so an address cannot be reused within one pass.
//! - **No Rollback**: a failed write leaves the buffer in an undefined
//!   state. Callers discard it.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Datelike;
use chrono::NaiveDateTime;
use chrono::Timelike;
use chrono::Utc;
use uuid::Uuid;

use crate::class::ClassRegistry;
use crate::class::Record;
use crate::class::class_header;
use crate::class::record_to_value_in;
use crate::tags;
use crate::types::Error;
use crate::types::Result;
use crate::value::ByteBuf;
use crate::value::Complex;
use crate::value::List;
use crate::value::Map;
use crate::value::Object;
use crate::value::Timestamp;
use crate::value::Value;

/// Maximum nesting of composites on both the write and read side.
///
/// Bounds recursion so deep input fails cleanly instead of exhausting the
/// stack. In simple mode it is also what stops a cyclic value.
pub const MAX_DEPTH: usize = 256;

/// Length of `s` in UTF-16 code units, the unit string prefixes count in.
pub fn utf16_len(s: &str) -> usize {
    if s.is_ascii() {
        s.len()
    } else {
        s.encode_utf16().count()
    }
}

/// Appends `s` in its shortest string form. Returns true when the long
/// form was used, which is the form that occupies a reference slot.
pub(crate) fn put_string(buf: &mut Vec<u8>, s: &str) -> bool {
    match utf16_len(s) {
        0 => {
            buf.push(tags::EMPTY);
            false
        }
        1 => {
            buf.push(tags::UTF8_CHAR);
            buf.extend_from_slice(s.as_bytes());
            false
        }
        len => {
            buf.push(tags::STRING);
            buf.extend_from_slice(len.to_string().as_bytes());
            buf.push(tags::QUOTE);
            buf.extend_from_slice(s.as_bytes());
            buf.push(tags::QUOTE);
            true
        }
    }
}

/// Shortest text that reads back to the same `f64`.
pub(crate) fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if v == 0.0 && v.is_sign_negative() {
        "-0".to_string()
    } else if v.fract() == 0.0 && v.abs() < 1e16 {
        (v as i64).to_string()
    } else {
        format!("{:?}", v)
    }
}

fn format_single(v: f32) -> String {
    if v == 0.0 && v.is_sign_negative() {
        "-0".to_string()
    } else if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e7 {
        (v as i64).to_string()
    } else {
        format!("{:?}", v)
    }
}

#[derive(Debug, Hash, PartialEq, Eq)]
enum ClassKey {
    Type(TypeId),
    Shape(String, Vec<String>),
}

#[derive(Default)]
struct RefTable {
    count: usize,
    strings: HashMap<String, usize>,
    handles: HashMap<usize, usize>,
    keepalive: Vec<Value>,
}

impl RefTable {
    fn clear(&mut self) {
        self.count = 0;
        self.strings.clear();
        self.handles.clear();
        self.keepalive.clear();
    }

    fn next(&mut self) -> usize {
        let index = self.count;
        self.count += 1;
        index
    }
}

/// Types that know how to write themselves to a [`Writer`].
pub trait Encode {
    fn encode(&self, writer: &mut Writer) -> Result<()>;
}

pub struct Writer {
    buf: Vec<u8>,
    simple: bool,
    refs: RefTable,
    classes: HashMap<ClassKey, usize>,
    registry: Arc<ClassRegistry>,
    depth: usize,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        Self::with_registry(ClassRegistry::global(), false)
    }

    /// A writer that never emits back references. Faster, but shared
    /// handles are duplicated and a cycle fails with a recursion error.
    pub fn simple() -> Self {
        Self::with_registry(ClassRegistry::global(), true)
    }

    pub fn with_registry(registry: Arc<ClassRegistry>, simple: bool) -> Self {
        Self {
            buf: Vec::new(),
            simple,
            refs: RefTable::default(),
            classes: HashMap::new(),
            registry,
            depth: 0,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.simple
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// The dynamic object form of `record`, named through this writer's
    /// registry.
    pub fn record_value<T: Record>(&self, record: &T) -> Value {
        record_to_value_in(&self.registry, record)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Takes the encoded bytes, leaving the tables untouched.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        mem::take(&mut self.buf)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Clears the reference table. Class definitions already written stay
    /// valid, which suits a stream where the peer keeps its class table.
    pub fn reset(&mut self) {
        self.refs.clear();
        self.depth = 0;
    }

    /// Clears the reference table and the class definitions.
    pub fn reset_all(&mut self) {
        self.reset();
        self.classes.clear();
    }

    /// Accounts for `n` slots the reader will register without this writer
    /// having written them itself.
    pub fn add_count(&mut self, n: usize) {
        self.refs.count += n;
    }

    /// Appends a bare tag byte, for protocol framing.
    pub fn write_tag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    /// Appends pre-encoded bytes unchanged.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write<T: Encode + ?Sized>(&mut self, value: &T) -> Result<()> {
        value.encode(self)
    }

    fn write_ref(&mut self, index: usize) {
        self.buf.push(tags::REF);
        self.buf.extend_from_slice(index.to_string().as_bytes());
        self.buf.push(tags::SEMICOLON);
    }

    /// Looks up a shared handle, writing a back reference if it was seen.
    fn try_write_handle_ref(&mut self, id: usize) -> bool {
        if self.simple {
            return false;
        }
        match self.refs.handles.get(&id) {
            Some(&index) => {
                self.write_ref(index);
                true
            }
            None => false,
        }
    }

    fn register_handle(&mut self, id: usize, handle: &Value) {
        let index = self.refs.next();
        if !self.simple {
            self.refs.handles.insert(id, index);
            self.refs.keepalive.push(handle.clone());
        }
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ========================================================================
    //  SCALARS
    // ========================================================================

    pub fn write_nil(&mut self) {
        self.buf.push(tags::NULL);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(if v { tags::TRUE } else { tags::FALSE });
    }

    pub fn write_int(&mut self, v: i64) {
        if (0..=9).contains(&v) {
            self.buf.push(b'0' + v as u8);
            return;
        }
        let tag = if i32::try_from(v).is_ok() { tags::INTEGER } else { tags::LONG };
        self.buf.push(tag);
        self.buf.extend_from_slice(v.to_string().as_bytes());
        self.buf.push(tags::SEMICOLON);
    }

    pub fn write_uint(&mut self, v: u64) {
        match i64::try_from(v) {
            Ok(v) => self.write_int(v),
            Err(_) => self.write_long_text(&v.to_string()),
        }
    }

    fn write_long_text(&mut self, digits: &str) {
        self.buf.push(tags::LONG);
        self.buf.extend_from_slice(digits.as_bytes());
        self.buf.push(tags::SEMICOLON);
    }

    /// Writes a float of the given bit precision (32 or 64). Single
    /// precision values are printed at their own shortest form.
    pub fn write_float(&mut self, v: f64, precision: u32) {
        if v.is_nan() {
            self.buf.push(tags::NAN);
        } else if v.is_infinite() {
            self.buf.push(tags::INFINITY);
            self.buf.push(if v > 0.0 { tags::POS } else { tags::NEG });
        } else {
            let text = if precision == 32 {
                format_single(v as f32)
            } else {
                format_double(v)
            };
            self.buf.push(tags::DOUBLE);
            self.buf.extend_from_slice(text.as_bytes());
            self.buf.push(tags::SEMICOLON);
        }
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_float(v, 64);
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_float(v as f64, 32);
    }

    pub fn write_complex(&mut self, v: Complex) -> Result<()> {
        if v.im == 0.0 {
            self.write_f64(v.re);
            return Ok(());
        }
        self.refs.next();
        self.buf.extend_from_slice(b"a2{");
        self.write_f64(v.re);
        self.write_f64(v.im);
        self.buf.push(tags::CLOSEBRACE);
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) {
        if utf16_len(s) > 1 && !self.simple {
            if let Some(&index) = self.refs.strings.get(s) {
                self.write_ref(index);
                return;
            }
        }
        if put_string(&mut self.buf, s) {
            let index = self.refs.next();
            if !self.simple {
                self.refs.strings.insert(s.to_string(), index);
            }
        }
    }

    /// Writes text that may not be valid UTF-8. Invalid input is written as
    /// a byte blob.
    pub fn write_utf8(&mut self, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(s) => self.write_str(s),
            Err(_) => self.write_bytes(bytes),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.refs.next();
        self.buf.push(tags::BYTES);
        if !bytes.is_empty() {
            self.buf.extend_from_slice(bytes.len().to_string().as_bytes());
        }
        self.buf.push(tags::QUOTE);
        self.buf.extend_from_slice(bytes);
        self.buf.push(tags::QUOTE);
    }

    pub fn write_guid(&mut self, guid: &Uuid) {
        self.refs.next();
        self.buf.push(tags::GUID);
        self.buf.push(tags::OPENBRACE);
        self.buf
            .extend_from_slice(guid.hyphenated().to_string().as_bytes());
        self.buf.push(tags::CLOSEBRACE);
    }

    /// Writes a date, a time of day, or both, depending on which parts are
    /// set. Midnight writes the date alone and 1970-01-01 the time alone.
    pub fn write_datetime(&mut self, ts: &Timestamp) -> Result<()> {
        let date = ts.naive.date();
        let time = ts.naive.time();
        if !(0..=9999).contains(&date.year()) {
            return Err(Error::Unsupported(format!("year {} out of range", date.year())));
        }
        self.refs.next();
        let nanos = time.nanosecond().min(999_999_999);
        let midnight = time.hour() == 0 && time.minute() == 0 && time.second() == 0 && nanos == 0;
        let epoch_day = date.year() == 1970 && date.month() == 1 && date.day() == 1;
        if midnight || !epoch_day {
            self.buf.push(tags::DATE);
            let text = format!("{:04}{:02}{:02}", date.year(), date.month(), date.day());
            self.buf.extend_from_slice(text.as_bytes());
        }
        if !midnight {
            self.buf.push(tags::TIME);
            let text = format!("{:02}{:02}{:02}", time.hour(), time.minute(), time.second());
            self.buf.extend_from_slice(text.as_bytes());
            if nanos != 0 {
                self.buf.push(tags::POINT);
                let fraction = if nanos % 1_000_000 == 0 {
                    format!("{:03}", nanos / 1_000_000)
                } else if nanos % 1_000 == 0 {
                    format!("{:06}", nanos / 1_000)
                } else {
                    format!("{:09}", nanos)
                };
                self.buf.extend_from_slice(fraction.as_bytes());
            }
        }
        self.buf.push(if ts.utc { tags::UTC } else { tags::SEMICOLON });
        Ok(())
    }

    // ========================================================================
    //  COMPOSITES
    // ========================================================================

    fn open(&mut self, tag: u8, count: usize) {
        self.buf.push(tag);
        if count > 0 {
            self.buf.extend_from_slice(count.to_string().as_bytes());
        }
        self.buf.push(tags::OPENBRACE);
    }

    /// Writes a typed list. Typed lists have no identity, so they take a
    /// slot but are never referenced.
    pub fn write_slice<T: Encode>(&mut self, items: &[T]) -> Result<()> {
        self.refs.next();
        self.enter()?;
        self.open(tags::LIST, items.len());
        for item in items {
            item.encode(self)?;
        }
        self.buf.push(tags::CLOSEBRACE);
        self.leave();
        Ok(())
    }

    /// Writes a typed map from an iterator of entries.
    pub fn write_entries<'a, K, V, I>(&mut self, entries: I) -> Result<()>
    where
        K: Encode + 'a,
        V: Encode + 'a,
        I: ExactSizeIterator<Item = (&'a K, &'a V)>,
    {
        self.refs.next();
        self.enter()?;
        self.open(tags::MAP, entries.len());
        for (key, value) in entries {
            key.encode(self)?;
            value.encode(self)?;
        }
        self.buf.push(tags::CLOSEBRACE);
        self.leave();
        Ok(())
    }

    fn class_index(&mut self, key: ClassKey, header: &[u8], ref_count: usize) -> usize {
        if let Some(&index) = self.classes.get(&key) {
            return index;
        }
        self.buf.extend_from_slice(header);
        self.refs.count += ref_count;
        let index = self.classes.len();
        self.classes.insert(key, index);
        index
    }

    /// Writes a record, emitting its class definition on first use.
    pub fn write_record<T: Record>(&mut self, record: &T) -> Result<()> {
        let descriptor = self.registry.descriptor::<T>();
        let values = record.to_fields();
        if values.len() != descriptor.fields().len() {
            return Err(Error::Unsupported(format!(
                "record {} produced {} fields, expected {}",
                descriptor.alias(),
                values.len(),
                descriptor.fields().len()
            )));
        }
        let index = self.class_index(
            ClassKey::Type(TypeId::of::<T>()),
            descriptor.header(),
            descriptor.ref_count(),
        );
        self.refs.next();
        self.write_object_body(index, &values)
    }

    fn write_object_body(&mut self, class: usize, values: &[Value]) -> Result<()> {
        self.enter()?;
        self.buf.push(tags::OBJECT);
        self.buf.extend_from_slice(class.to_string().as_bytes());
        self.buf.push(tags::OPENBRACE);
        for value in values {
            self.write_value(value)?;
        }
        self.buf.push(tags::CLOSEBRACE);
        self.leave();
        Ok(())
    }

    fn write_list_handle(&mut self, list: &List, handle: &Value) -> Result<()> {
        if self.try_write_handle_ref(list.id()) {
            return Ok(());
        }
        self.register_handle(list.id(), handle);
        let items = list.snapshot();
        self.enter()?;
        self.open(tags::LIST, items.len());
        for item in &items {
            self.write_value(item)?;
        }
        self.buf.push(tags::CLOSEBRACE);
        self.leave();
        Ok(())
    }

    fn write_map_handle(&mut self, map: &Map, handle: &Value) -> Result<()> {
        if self.try_write_handle_ref(map.id()) {
            return Ok(());
        }
        self.register_handle(map.id(), handle);
        let entries = map.snapshot();
        self.enter()?;
        self.open(tags::MAP, entries.len());
        for (key, value) in &entries {
            self.write_value(key)?;
            self.write_value(value)?;
        }
        self.buf.push(tags::CLOSEBRACE);
        self.leave();
        Ok(())
    }

    fn write_object_handle(&mut self, obj: &Object, handle: &Value) -> Result<()> {
        if self.try_write_handle_ref(obj.id()) {
            return Ok(());
        }
        let alias = obj.alias();
        let (names, values): (Vec<String>, Vec<Value>) = obj.fields().into_iter().unzip();
        let key = ClassKey::Shape(alias.clone(), names.clone());
        let index = match self.classes.get(&key) {
            Some(&index) => index,
            None => {
                let borrowed: Vec<&str> = names.iter().map(String::as_str).collect();
                let (header, ref_count) = class_header(&alias, &borrowed);
                self.class_index(key, &header, ref_count)
            }
        };
        // The class definition's name slots come before the object's own.
        self.register_handle(obj.id(), handle);
        self.write_object_body(index, &values)
    }

    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.write_nil(),
            Value::Bool(v) => self.write_bool(*v),
            Value::Int(v) => self.write_int(*v),
            Value::BigInt(digits) => self.write_long_text(digits),
            Value::Double(v) => self.write_f64(*v),
            Value::String(s) => self.write_str(s),
            Value::Bytes(b) => self.write_bytes(b),
            Value::Guid(g) => self.write_guid(g),
            Value::DateTime(ts) => self.write_datetime(ts)?,
            Value::List(list) => self.write_list_handle(list, value)?,
            Value::Map(map) => self.write_map_handle(map, value)?,
            Value::Object(obj) => self.write_object_handle(obj, value)?,
        }
        Ok(())
    }
}

// ============================================================================
//  ENCODE IMPLS
// ============================================================================

macro_rules! encode_signed {
    ($($ty:ty),*) => {
        $(impl Encode for $ty {
            fn encode(&self, writer: &mut Writer) -> Result<()> {
                writer.write_int(*self as i64);
                Ok(())
            }
        })*
    };
}

macro_rules! encode_unsigned {
    ($($ty:ty),*) => {
        $(impl Encode for $ty {
            fn encode(&self, writer: &mut Writer) -> Result<()> {
                writer.write_uint(*self as u64);
                Ok(())
            }
        })*
    };
}

encode_signed!(i8, i16, i32, i64, isize);
encode_unsigned!(u8, u16, u32, u64, usize);

impl Encode for () {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_nil();
        Ok(())
    }
}

impl Encode for bool {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_bool(*self);
        Ok(())
    }
}

impl Encode for f64 {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_f64(*self);
        Ok(())
    }
}

impl Encode for f32 {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_f32(*self);
        Ok(())
    }
}

impl Encode for Complex {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_complex(*self)
    }
}

impl Encode for str {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_str(self);
        Ok(())
    }
}

impl Encode for String {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_str(self);
        Ok(())
    }
}

impl Encode for ByteBuf {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_bytes(&self.0);
        Ok(())
    }
}

impl Encode for Uuid {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_guid(self);
        Ok(())
    }
}

impl Encode for Timestamp {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_datetime(self)
    }
}

impl Encode for NaiveDateTime {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_datetime(&Timestamp::local(*self))
    }
}

impl Encode for DateTime<Utc> {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_datetime(&Timestamp::utc(self.naive_utc()))
    }
}

impl Encode for Value {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_value(self)
    }
}

impl Encode for List {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_value(&Value::List(self.clone()))
    }
}

impl Encode for Map {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_value(&Value::Map(self.clone()))
    }
}

impl Encode for Object {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_value(&Value::Object(self.clone()))
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        (**self).encode(writer)
    }
}

impl<T: Encode + ?Sized> Encode for Box<T> {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        (**self).encode(writer)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        match self {
            Some(v) => v.encode(writer),
            None => {
                writer.write_nil();
                Ok(())
            }
        }
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_slice(self)
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_slice(self)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_slice(self)
    }
}

impl<K: Encode, V: Encode, S> Encode for HashMap<K, V, S> {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_entries(self.iter())
    }
}

impl<K: Encode, V: Encode> Encode for BTreeMap<K, V> {
    fn encode(&self, writer: &mut Writer) -> Result<()> {
        writer.write_entries(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write(value).unwrap();
        writer.into_bytes()
    }

    #[test]
    fn integers() {
        assert_eq!(encode(&0i32), b"0");
        assert_eq!(encode(&9i64), b"9");
        assert_eq!(encode(&10i32), b"i10;");
        assert_eq!(encode(&-1i32), b"i-1;");
        assert_eq!(encode(&(i32::MAX as i64 + 1)), b"l2147483648;");
        assert_eq!(encode(&u64::MAX), b"l18446744073709551615;");
    }

    #[test]
    fn floats() {
        assert_eq!(encode(&f64::NAN), b"N");
        assert_eq!(encode(&f64::INFINITY), b"I+");
        assert_eq!(encode(&f64::NEG_INFINITY), b"I-");
        assert_eq!(encode(&1.5f64), b"d1.5;");
        assert_eq!(encode(&2.0f64), b"d2;");
        assert_eq!(encode(&0.1f32), b"d0.1;");
    }

    #[test]
    fn strings() {
        assert_eq!(encode(""), b"e");
        assert_eq!(encode("x"), b"ux");
        assert_eq!(encode("é"), "ué".as_bytes());
        assert_eq!(encode("hello"), b"s5\"hello\"");
        // One astral code point is two UTF-16 units, so it is not a char.
        assert_eq!(encode("😀"), "s2\"😀\"".as_bytes());
    }

    #[test]
    fn repeated_string_is_referenced() {
        let bytes = encode(&vec!["abc", "abc", "z", "z"]);
        assert_eq!(bytes, b"a4{s3\"abc\"r1;uzuz}");
    }

    #[test]
    fn invalid_utf8_falls_back_to_bytes() {
        let mut writer = Writer::new();
        writer.write_utf8(&[0xff, 0x41]);
        assert_eq!(writer.as_bytes(), b"b2\"\xffA\"");
    }

    #[test]
    fn empty_containers_omit_count() {
        assert_eq!(encode(&Vec::<i32>::new()), b"a{}");
        assert_eq!(encode(&HashMap::<i32, i32>::new()), b"m{}");
        assert_eq!(encode(&ByteBuf(vec![])), b"b\"\"");
    }

    #[test]
    fn dates() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 2, 3).unwrap();
        let midnight = date.and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(encode(&midnight), b"D20240203;");

        let full = date.and_hms_milli_opt(4, 5, 6, 7).unwrap();
        assert_eq!(encode(&Timestamp::utc(full)), b"D20240203T040506.007Z");

        let clock = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_micro_opt(12, 0, 1, 5)
            .unwrap();
        assert_eq!(encode(&clock), b"T120001.000005;");
    }

    #[test]
    fn guid() {
        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        assert_eq!(encode(&id), b"g{01234567-89ab-cdef-0123-456789abcdef}");
    }

    #[test]
    fn shared_list_is_referenced() {
        let inner = List::from_vec(vec![Value::Int(1)]);
        let outer = Value::list([Value::List(inner.clone()), Value::List(inner)]);
        assert_eq!(encode(&outer), b"a2{a1{1}r1;}");
    }

    #[test]
    fn simple_mode_duplicates_and_bounds_cycles() {
        let inner = List::from_vec(vec![Value::Int(1)]);
        let outer = Value::list([Value::List(inner.clone()), Value::List(inner)]);
        let mut writer = Writer::simple();
        writer.write_value(&outer).unwrap();
        assert_eq!(writer.as_bytes(), b"a2{a1{1}a1{1}}");

        let cyclic = List::new();
        cyclic.push(Value::List(cyclic.clone()));
        let mut writer = Writer::simple();
        let result = writer.write_value(&Value::List(cyclic.clone()));
        assert_eq!(result, Err(Error::RecursionLimitExceeded));
        cyclic.replace(vec![]);
    }

    #[test]
    fn reset_keeps_class_definitions() {
        let obj = Value::Object(Object::with_fields("P", vec![("x".into(), Value::Int(1))]));
        let mut writer = Writer::new();
        writer.write_value(&obj).unwrap();
        writer.reset();
        let start = writer.len();
        let again = Value::Object(Object::with_fields("P", vec![("x".into(), Value::Int(2))]));
        writer.write_value(&again).unwrap();
        assert_eq!(&writer.as_bytes()[start..], b"o0{2}");

        writer.reset_all();
        let start = writer.len();
        writer.write_value(&again).unwrap();
        assert_eq!(&writer.as_bytes()[start..], b"c1\"P\"1{ux}o0{2}");
    }
}
