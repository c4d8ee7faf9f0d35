//! # Reader
//!
//! Decodes the tag format. Every read starts with one tag byte, which is
//! looked up in a 256-entry table for the requested target kind. The same
//! tag can mean different things per target (a digit reads as a number, a
//! boolean, or a one-character string), so each kind has its own table.
//!
//! ## Invariants
//! - **Registration Order**: long strings, bytes, GUIDs, dates, lists, maps,
//!   objects and class field names are appended to the reference table as
//!   they are read, composites before their elements.
//! - **Aliasing**: a reference to a list, map or object returns a handle to
//!   the same storage. References to anything else return a copy.
//! - **Whole Units**: a read consumes exactly one encoded unit, whatever the
//!   destination keeps of it.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::LazyLock;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::NaiveTime;
use chrono::Utc;
use uuid::Uuid;

use crate::class::ClassRegistry;
use crate::class::Record;
use crate::class::record_from_value_in;
use crate::cursor::ByteCursor;
use crate::cursor::parse_i64;
use crate::tags;
use crate::types::Error;
use crate::types::Result;
use crate::value::ByteBuf;
use crate::value::Complex;
use crate::value::FromValue;
use crate::value::List;
use crate::value::Map;
use crate::value::Object;
use crate::value::Timestamp;
use crate::value::Value;
use crate::value::fill_vec;
use crate::writer::MAX_DEPTH;

type DecodeFn<T> = fn(&mut Reader<'_>, u8) -> Result<T>;

/// Tag-indexed decode functions for one target kind.
pub struct DispatchTable<T> {
    entries: [Option<DecodeFn<T>>; 256],
    target: &'static str,
}

impl<T> DispatchTable<T> {
    fn new(target: &'static str) -> Self {
        Self {
            entries: std::array::from_fn(|_| None),
            target,
        }
    }

    fn set(&mut self, tag: u8, f: DecodeFn<T>) -> &mut Self {
        self.entries[tag as usize] = Some(f);
        self
    }

    fn set_all(&mut self, tags: &[u8], f: DecodeFn<T>) -> &mut Self {
        for &tag in tags {
            self.entries[tag as usize] = Some(f);
        }
        self
    }

    fn set_digits(&mut self, f: DecodeFn<T>) -> &mut Self {
        for tag in b'0'..=b'9' {
            self.entries[tag as usize] = Some(f);
        }
        self
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn supports(&self, tag: u8) -> bool {
        self.entries[tag as usize].is_some()
    }

    pub fn decode(&self, reader: &mut Reader<'_>, tag: u8) -> Result<T> {
        match self.entries[tag as usize] {
            Some(f) => f(reader, tag),
            None => Err(Error::CastTag { tag, target: self.target }),
        }
    }
}

/// Reads the whole unit as a dynamic value and converts it.
fn via_value<T: FromValue>(reader: &mut Reader<'_>, tag: u8) -> Result<T> {
    let value = VALUE_TABLE.decode(reader, tag)?;
    T::from_value(&value)
}

// ============================================================================
//  DYNAMIC VALUES
// ============================================================================

fn value_digit(_: &mut Reader<'_>, tag: u8) -> Result<Value> {
    Ok(Value::Int((tag - b'0') as i64))
}

fn value_integer(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    Ok(Value::Int(reader.cursor.read_int(tags::SEMICOLON)?))
}

fn value_long(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let run = reader.cursor.read_until(tags::SEMICOLON)?;
    if let Ok(v) = parse_i64(run) {
        return Ok(Value::Int(v));
    }
    let digits = match run.first() {
        Some(b'-') | Some(b'+') => &run[1..],
        _ => run,
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::Malformed(format!("bad long {:?}", String::from_utf8_lossy(run))));
    }
    let text = std::str::from_utf8(run).map_err(|_| Error::InvalidUtf8)?;
    Ok(Value::BigInt(text.trim_start_matches('+').to_string()))
}

fn value_double(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let run = reader.cursor.read_until(tags::SEMICOLON)?;
    let text = std::str::from_utf8(run).map_err(|_| Error::InvalidUtf8)?;
    text.parse::<f64>()
        .map(Value::Double)
        .map_err(|_| Error::Malformed(format!("bad double {:?}", text)))
}

fn value_infinity(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    match reader.cursor.read_byte()? {
        tags::POS => Ok(Value::Double(f64::INFINITY)),
        tags::NEG => Ok(Value::Double(f64::NEG_INFINITY)),
        found => Err(Error::InvalidTag { found, expected: "infinity sign" }),
    }
}

fn value_char(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    Ok(Value::String(reader.cursor.read_utf16_units(1)?.to_string()))
}

fn value_string(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let text = reader.read_string_body()?;
    let value = Value::String(text);
    reader.set_ref(&value);
    Ok(value)
}

fn value_bytes(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let len = reader.cursor.read_count(tags::QUOTE)?;
    let bytes = reader.cursor.read_bytes(len)?.to_vec();
    reader.cursor.expect(tags::QUOTE, "closing quote")?;
    let value = Value::Bytes(bytes);
    reader.set_ref(&value);
    Ok(value)
}

fn value_guid(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    reader.cursor.expect(tags::OPENBRACE, "guid open brace")?;
    let text = reader.cursor.read_bytes(36)?;
    reader.cursor.expect(tags::CLOSEBRACE, "guid close brace")?;
    let guid = Uuid::try_parse_ascii(text)
        .map_err(|_| Error::Malformed(format!("bad guid {:?}", String::from_utf8_lossy(text))))?;
    let value = Value::Guid(guid);
    reader.set_ref(&value);
    Ok(value)
}

fn value_date(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let year = reader.read_digits(4)? as i32;
    let month = reader.read_digits(2)?;
    let day = reader.read_digits(2)?;
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| Error::Malformed(format!("bad date {:04}{:02}{:02}", year, month, day)))?;
    let mut tag = reader.cursor.read_byte()?;
    let mut time = NaiveTime::MIN;
    if tag == tags::TIME {
        time = reader.read_clock()?;
        tag = reader.cursor.read_byte()?;
    }
    reader.finish_datetime(date.and_time(time), tag)
}

fn value_time(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let time = reader.read_clock()?;
    let tag = reader.cursor.read_byte()?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    reader.finish_datetime(epoch.and_time(time), tag)
}

fn value_list(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let count = reader.cursor.read_count(tags::OPENBRACE)?;
    let list = List::new();
    let value = Value::List(list.clone());
    reader.set_ref(&value);
    reader.enter()?;
    let mut items = Vec::with_capacity(count.min(reader.cursor.remaining()));
    for _ in 0..count {
        items.push(reader.read_value()?);
    }
    reader.cursor.expect(tags::CLOSEBRACE, "list close brace")?;
    reader.leave();
    list.replace(items);
    Ok(value)
}

fn value_map(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let count = reader.cursor.read_count(tags::OPENBRACE)?;
    let map = Map::new();
    let value = Value::Map(map.clone());
    reader.set_ref(&value);
    reader.enter()?;
    let mut entries = Vec::with_capacity(count.min(reader.cursor.remaining()));
    for _ in 0..count {
        let key = reader.read_value()?;
        let item = reader.read_value()?;
        entries.push((key, item));
    }
    reader.cursor.expect(tags::CLOSEBRACE, "map close brace")?;
    reader.leave();
    map.replace(entries);
    Ok(value)
}

fn value_object(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let index = reader.cursor.read_count(tags::OPENBRACE)?;
    let class = reader
        .classes
        .get(index)
        .cloned()
        .ok_or(Error::UnknownClass(index))?;
    let obj = Object::new(class.alias);
    let value = Value::Object(obj.clone());
    reader.set_ref(&value);
    reader.enter()?;
    let mut fields = Vec::with_capacity(class.fields.len());
    for name in class.fields {
        fields.push((name, reader.read_value()?));
    }
    reader.cursor.expect(tags::CLOSEBRACE, "object close brace")?;
    reader.leave();
    obj.replace_fields(fields);
    Ok(value)
}

fn value_class(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    reader.read_class_def()?;
    reader.read_value()
}

fn value_ref(reader: &mut Reader<'_>, _: u8) -> Result<Value> {
    let index = reader.cursor.read_count(tags::SEMICOLON)?;
    reader.get_ref(index)
}

fn value_table() -> DispatchTable<Value> {
    let mut t = DispatchTable::new("value");
    t.set_digits(value_digit)
        .set(tags::INTEGER, value_integer)
        .set(tags::LONG, value_long)
        .set(tags::DOUBLE, value_double)
        .set(tags::NAN, |_, _| Ok(Value::Double(f64::NAN)))
        .set(tags::INFINITY, value_infinity)
        .set(tags::NULL, |_, _| Ok(Value::Null))
        .set(tags::EMPTY, |_, _| Ok(Value::String(String::new())))
        .set(tags::TRUE, |_, _| Ok(Value::Bool(true)))
        .set(tags::FALSE, |_, _| Ok(Value::Bool(false)))
        .set(tags::UTF8_CHAR, value_char)
        .set(tags::STRING, value_string)
        .set(tags::BYTES, value_bytes)
        .set(tags::GUID, value_guid)
        .set(tags::DATE, value_date)
        .set(tags::TIME, value_time)
        .set(tags::LIST, value_list)
        .set(tags::MAP, value_map)
        .set(tags::CLASS, value_class)
        .set(tags::OBJECT, value_object)
        .set(tags::REF, value_ref);
    t
}

// ============================================================================
//  TYPED TABLES
// ============================================================================

fn bool_table() -> DispatchTable<bool> {
    let mut t = DispatchTable::new("bool");
    t.set_digits(|_, tag| Ok(tag != b'0'))
        .set_all(&[tags::NULL, tags::EMPTY, tags::FALSE], |_, _| Ok(false))
        .set_all(&[tags::TRUE, tags::NAN], |_, _| Ok(true))
        .set_all(
            &[
                tags::INTEGER,
                tags::LONG,
                tags::DOUBLE,
                tags::INFINITY,
                tags::UTF8_CHAR,
                tags::STRING,
                tags::REF,
            ],
            via_value::<bool>,
        );
    t
}

fn i64_table() -> DispatchTable<i64> {
    let mut t = DispatchTable::new("i64");
    t.set_digits(|_, tag| Ok((tag - b'0') as i64))
        .set_all(&[tags::NULL, tags::EMPTY, tags::FALSE], |_, _| Ok(0))
        .set(tags::TRUE, |_, _| Ok(1))
        .set(tags::INTEGER, |r, _| r.cursor.read_int(tags::SEMICOLON))
        .set_all(
            &[
                tags::LONG,
                tags::DOUBLE,
                tags::UTF8_CHAR,
                tags::STRING,
                tags::DATE,
                tags::TIME,
                tags::REF,
            ],
            via_value::<i64>,
        );
    t
}

fn u64_table() -> DispatchTable<u64> {
    let mut t = DispatchTable::new("u64");
    t.set_digits(|_, tag| Ok((tag - b'0') as u64))
        .set_all(&[tags::NULL, tags::EMPTY, tags::FALSE], |_, _| Ok(0))
        .set(tags::TRUE, |_, _| Ok(1))
        .set_all(
            &[
                tags::INTEGER,
                tags::LONG,
                tags::DOUBLE,
                tags::UTF8_CHAR,
                tags::STRING,
                tags::DATE,
                tags::TIME,
                tags::REF,
            ],
            via_value::<u64>,
        );
    t
}

fn f64_table() -> DispatchTable<f64> {
    let mut t = DispatchTable::new("f64");
    t.set_digits(|_, tag| Ok((tag - b'0') as f64))
        .set_all(&[tags::NULL, tags::EMPTY, tags::FALSE], |_, _| Ok(0.0))
        .set(tags::TRUE, |_, _| Ok(1.0))
        .set(tags::NAN, |_, _| Ok(f64::NAN))
        .set_all(
            &[
                tags::INTEGER,
                tags::LONG,
                tags::DOUBLE,
                tags::INFINITY,
                tags::UTF8_CHAR,
                tags::STRING,
                tags::REF,
            ],
            via_value::<f64>,
        );
    t
}

fn complex_table() -> DispatchTable<Complex> {
    let mut t = DispatchTable::new("complex");
    t.set_digits(|_, tag| Ok(Complex::new((tag - b'0') as f64, 0.0)))
        .set_all(
            &[
                tags::NULL,
                tags::EMPTY,
                tags::TRUE,
                tags::FALSE,
                tags::NAN,
                tags::INTEGER,
                tags::LONG,
                tags::DOUBLE,
                tags::INFINITY,
                tags::UTF8_CHAR,
                tags::STRING,
                tags::LIST,
                tags::REF,
            ],
            via_value::<Complex>,
        );
    t
}

fn string_table() -> DispatchTable<String> {
    let mut t = DispatchTable::new("string");
    t.set_digits(|_, tag| Ok((tag as char).to_string()))
        .set_all(&[tags::NULL, tags::EMPTY], |_, _| Ok(String::new()))
        .set(tags::TRUE, |_, _| Ok("true".to_string()))
        .set(tags::FALSE, |_, _| Ok("false".to_string()))
        .set(tags::UTF8_CHAR, |r, _| Ok(r.cursor.read_utf16_units(1)?.to_string()))
        .set(tags::STRING, |r, _| {
            let text = r.read_string_body()?;
            r.set_ref(&Value::String(text.clone()));
            Ok(text)
        })
        .set_all(
            &[
                tags::INTEGER,
                tags::LONG,
                tags::DOUBLE,
                tags::NAN,
                tags::INFINITY,
                tags::BYTES,
                tags::GUID,
                tags::DATE,
                tags::TIME,
                tags::REF,
            ],
            via_value::<String>,
        );
    t
}

fn bytes_table() -> DispatchTable<ByteBuf> {
    let mut t = DispatchTable::new("bytes");
    t.set_all(&[tags::NULL, tags::EMPTY], |_, _| Ok(ByteBuf::default()))
        .set_all(
            &[tags::BYTES, tags::UTF8_CHAR, tags::STRING, tags::LIST, tags::REF],
            via_value::<ByteBuf>,
        );
    t
}

fn guid_table() -> DispatchTable<Uuid> {
    let mut t = DispatchTable::new("guid");
    t.set_all(
        &[tags::GUID, tags::STRING, tags::BYTES, tags::REF],
        via_value::<Uuid>,
    );
    t
}

fn datetime_table() -> DispatchTable<Timestamp> {
    let mut t = DispatchTable::new("datetime");
    t.set_all(
        &[
            tags::DATE,
            tags::TIME,
            tags::INTEGER,
            tags::LONG,
            tags::STRING,
            tags::REF,
        ],
        via_value::<Timestamp>,
    )
    .set_digits(via_value::<Timestamp>);
    t
}

fn values_for(target: &'static str, accepted: &[u8]) -> DispatchTable<Value> {
    let mut t = DispatchTable::new(target);
    for &tag in accepted {
        if let Some(f) = VALUE_TABLE.entries[tag as usize] {
            t.set(tag, f);
        }
    }
    t
}

fn list_table() -> DispatchTable<Value> {
    values_for(
        "list",
        &[tags::LIST, tags::BYTES, tags::NULL, tags::EMPTY, tags::REF],
    )
}

fn map_table() -> DispatchTable<Value> {
    values_for(
        "map",
        &[
            tags::MAP,
            tags::OBJECT,
            tags::CLASS,
            tags::LIST,
            tags::NULL,
            tags::EMPTY,
            tags::REF,
        ],
    )
}

fn object_table() -> DispatchTable<Value> {
    let mut t = values_for(
        "object",
        &[tags::OBJECT, tags::MAP, tags::NULL, tags::REF],
    );
    t.set(tags::CLASS, |r, _| {
        r.read_class_def()?;
        let tag = r.read_tag()?;
        OBJECT_TABLE.decode(r, tag)
    });
    t
}

static VALUE_TABLE: LazyLock<DispatchTable<Value>> = LazyLock::new(value_table);
static BOOL_TABLE: LazyLock<DispatchTable<bool>> = LazyLock::new(bool_table);
static I64_TABLE: LazyLock<DispatchTable<i64>> = LazyLock::new(i64_table);
static U64_TABLE: LazyLock<DispatchTable<u64>> = LazyLock::new(u64_table);
static F64_TABLE: LazyLock<DispatchTable<f64>> = LazyLock::new(f64_table);
static COMPLEX_TABLE: LazyLock<DispatchTable<Complex>> = LazyLock::new(complex_table);
static STRING_TABLE: LazyLock<DispatchTable<String>> = LazyLock::new(string_table);
static BYTES_TABLE: LazyLock<DispatchTable<ByteBuf>> = LazyLock::new(bytes_table);
static GUID_TABLE: LazyLock<DispatchTable<Uuid>> = LazyLock::new(guid_table);
static DATETIME_TABLE: LazyLock<DispatchTable<Timestamp>> = LazyLock::new(datetime_table);
static LIST_TABLE: LazyLock<DispatchTable<Value>> = LazyLock::new(list_table);
static MAP_TABLE: LazyLock<DispatchTable<Value>> = LazyLock::new(map_table);
static OBJECT_TABLE: LazyLock<DispatchTable<Value>> = LazyLock::new(object_table);

// ============================================================================
//  READER
// ============================================================================

#[derive(Debug, Clone)]
struct ClassDef {
    alias: String,
    fields: Vec<String>,
}

/// Types that can be read from a [`Reader`].
pub trait Decode: Sized {
    fn decode(reader: &mut Reader<'_>) -> Result<Self>;
}

pub struct Reader<'a> {
    cursor: ByteCursor<'a>,
    simple: bool,
    refs: Vec<Value>,
    classes: Vec<ClassDef>,
    registry: Arc<ClassRegistry>,
    depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_registry(buf, ClassRegistry::global(), false)
    }

    /// A reader that keeps no reference table, for streams written by a
    /// simple-mode writer.
    pub fn simple(buf: &'a [u8]) -> Self {
        Self::with_registry(buf, ClassRegistry::global(), true)
    }

    pub fn with_registry(buf: &'a [u8], registry: Arc<ClassRegistry>, simple: bool) -> Self {
        Self {
            cursor: ByteCursor::new(buf),
            simple,
            refs: Vec::new(),
            classes: Vec::new(),
            registry,
            depth: 0,
        }
    }

    pub fn pos(&self) -> usize {
        self.cursor.pos()
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_empty()
    }

    /// The unread tail of the input.
    pub fn rest(&self) -> &'a [u8] {
        self.cursor.as_slice()
    }

    pub fn reset(&mut self) {
        self.refs.clear();
        self.depth = 0;
    }

    pub fn reset_all(&mut self) {
        self.reset();
        self.classes.clear();
    }

    pub fn read_tag(&mut self) -> Result<u8> {
        self.cursor.read_byte()
    }

    pub fn peek_tag(&self) -> Result<u8> {
        self.cursor.peek_byte()
    }

    /// Consumes `tag` or fails without consuming anything.
    pub fn expect_tag(&mut self, tag: u8, what: &'static str) -> Result<()> {
        let found = self.cursor.peek_byte()?;
        if found != tag {
            return Err(Error::InvalidTag { found, expected: what });
        }
        self.cursor.skip(1)
    }

    pub fn read<T: Decode>(&mut self) -> Result<T> {
        T::decode(self)
    }

    pub fn read_value(&mut self) -> Result<Value> {
        let tag = self.read_tag()?;
        VALUE_TABLE.decode(self, tag)
    }

    /// Reads a list into `dest`, reusing its allocation.
    pub fn read_into<T: FromValue>(&mut self, dest: &mut Vec<T>) -> Result<()> {
        let tag = self.read_tag()?;
        let value = LIST_TABLE.decode(self, tag)?;
        fill_vec(dest, &value)
    }

    /// Reads a record, resolving field names through this reader's registry.
    pub fn read_record<T: Record>(&mut self) -> Result<T> {
        let tag = self.read_tag()?;
        let value = OBJECT_TABLE.decode(self, tag)?;
        record_from_value_in(&self.registry, &value)
    }

    /// Returns the exact bytes of the next value without materializing it.
    pub fn read_raw(&mut self) -> Result<&'a [u8]> {
        crate::raw::read_raw(&mut self.cursor)
    }

    fn set_ref(&mut self, value: &Value) {
        if !self.simple {
            self.refs.push(value.clone());
        }
    }

    fn get_ref(&self, index: usize) -> Result<Value> {
        self.refs.get(index).cloned().ok_or(Error::UnresolvedRef(index))
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

    /// Reads `<utf16len>"<text>"` after an `s` tag.
    fn read_string_body(&mut self) -> Result<String> {
        let units = self.cursor.read_count(tags::QUOTE)?;
        let text = self.cursor.read_utf16_units(units)?.to_string();
        self.cursor.expect(tags::QUOTE, "closing quote")?;
        Ok(text)
    }

    fn read_class_def(&mut self) -> Result<()> {
        let units = self.cursor.read_count(tags::QUOTE)?;
        let alias = self.cursor.read_utf16_units(units)?.to_string();
        self.cursor.expect(tags::QUOTE, "closing quote")?;
        let count = self.cursor.read_count(tags::OPENBRACE)?;
        let mut fields = Vec::with_capacity(count.min(self.cursor.remaining()));
        for _ in 0..count {
            fields.push(self.read::<String>()?);
        }
        self.cursor.expect(tags::CLOSEBRACE, "class close brace")?;
        self.classes.push(ClassDef { alias, fields });
        Ok(())
    }

    fn read_digits(&mut self, n: usize) -> Result<u32> {
        let run = self.cursor.read_bytes(n)?;
        let mut v = 0u32;
        for &b in run {
            if !b.is_ascii_digit() {
                return Err(Error::Malformed(format!("expected digit, found {:#04x}", b)));
            }
            v = v * 10 + (b - b'0') as u32;
        }
        Ok(v)
    }

    /// Reads `hhmmss[.fff[fff[fff]]]`.
    fn read_clock(&mut self) -> Result<NaiveTime> {
        let hour = self.read_digits(2)?;
        let minute = self.read_digits(2)?;
        let second = self.read_digits(2)?;
        let mut nanos = 0;
        if self.cursor.peek_byte()? == tags::POINT {
            self.cursor.skip(1)?;
            nanos = self.read_digits(3)? * 1_000_000;
            if self.cursor.peek_byte()?.is_ascii_digit() {
                nanos += self.read_digits(3)? * 1_000;
                if self.cursor.peek_byte()?.is_ascii_digit() {
                    nanos += self.read_digits(3)?;
                }
            }
        }
        NaiveTime::from_hms_nano_opt(hour, minute, second, nanos).ok_or_else(|| {
            Error::Malformed(format!("bad time {:02}{:02}{:02}", hour, minute, second))
        })
    }

    fn finish_datetime(&mut self, naive: NaiveDateTime, terminator: u8) -> Result<Value> {
        let utc = match terminator {
            tags::UTC => true,
            tags::SEMICOLON => false,
            found => return Err(Error::InvalidTag { found, expected: "date terminator" }),
        };
        let value = Value::DateTime(Timestamp { naive, utc });
        self.set_ref(&value);
        Ok(value)
    }
}

// ============================================================================
//  DECODE IMPLS
// ============================================================================

macro_rules! decode_with_table {
    ($($ty:ty => $table:ident),* $(,)?) => {
        $(impl Decode for $ty {
            fn decode(reader: &mut Reader<'_>) -> Result<Self> {
                let tag = reader.read_tag()?;
                $table.decode(reader, tag)
            }
        })*
    };
}

decode_with_table!(
    Value => VALUE_TABLE,
    bool => BOOL_TABLE,
    i64 => I64_TABLE,
    u64 => U64_TABLE,
    f64 => F64_TABLE,
    Complex => COMPLEX_TABLE,
    String => STRING_TABLE,
    ByteBuf => BYTES_TABLE,
    Uuid => GUID_TABLE,
    Timestamp => DATETIME_TABLE,
);

macro_rules! decode_narrow {
    ($wide:ty => $($ty:ty),*) => {
        $(impl Decode for $ty {
            fn decode(reader: &mut Reader<'_>) -> Result<Self> {
                let wide = <$wide>::decode(reader)?;
                <$ty>::try_from(wide).map_err(|_| Error::NumberOutOfRange {
                    value: wide.to_string(),
                    target: stringify!($ty),
                })
            }
        })*
    };
}

decode_narrow!(i64 => i8, i16, i32, isize);
decode_narrow!(u64 => u8, u16, u32, usize);

impl Decode for f32 {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        f64::decode(reader).map(|v| v as f32)
    }
}

impl Decode for NaiveDateTime {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Timestamp::decode(reader).map(|ts| ts.naive)
    }
}

impl Decode for DateTime<Utc> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Timestamp::decode(reader).map(|ts| ts.naive.and_utc())
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        if reader.peek_tag()? == tags::NULL {
            reader.cursor.skip(1)?;
            return Ok(None);
        }
        T::decode(reader).map(Some)
    }
}

macro_rules! decode_via_table {
    ($table:ident => $($ty:ty),* $(,)?) => {
        $(impl Decode for $ty {
            fn decode(reader: &mut Reader<'_>) -> Result<Self> {
                let tag = reader.read_tag()?;
                let value = $table.decode(reader, tag)?;
                <$ty>::from_value(&value)
            }
        })*
    };
}

decode_via_table!(LIST_TABLE => List);
decode_via_table!(MAP_TABLE => Map);
decode_via_table!(OBJECT_TABLE => Object);

impl<T: FromValue> Decode for Vec<T> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let mut out = Vec::new();
        reader.read_into(&mut out)?;
        Ok(out)
    }
}

impl<T: FromValue + Default, const N: usize> Decode for [T; N] {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let tag = reader.read_tag()?;
        let value = LIST_TABLE.decode(reader, tag)?;
        <[T; N]>::from_value(&value)
    }
}

impl<K: FromValue + Eq + Hash, V: FromValue> Decode for HashMap<K, V> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let tag = reader.read_tag()?;
        let value = MAP_TABLE.decode(reader, tag)?;
        HashMap::from_value(&value)
    }
}

impl<K: FromValue + Ord, V: FromValue> Decode for BTreeMap<K, V> {
    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let tag = reader.read_tag()?;
        let value = MAP_TABLE.decode(reader, tag)?;
        BTreeMap::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read<T: Decode>(bytes: &[u8]) -> Result<T> {
        Reader::new(bytes).read::<T>()
    }

    #[test]
    fn digits_depend_on_target() {
        assert_eq!(read::<i32>(b"7").unwrap(), 7);
        assert!(read::<bool>(b"7").unwrap());
        assert!(!read::<bool>(b"0").unwrap());
        assert_eq!(read::<String>(b"7").unwrap(), "7");
        assert_eq!(read::<f64>(b"7").unwrap(), 7.0);
    }

    #[test]
    fn unmapped_tag_is_cast_error() {
        let err = read::<i64>(b"a{}").unwrap_err();
        assert_eq!(err, Error::CastTag { tag: tags::LIST, target: "i64" });
        assert_eq!(err.to_string(), "cannot cast tag list ('a') to type i64");
    }

    #[test]
    fn long_beyond_i64_is_bigint() {
        let v = read::<Value>(b"l123456789012345678901234567890;").unwrap();
        assert_eq!(v, Value::BigInt("123456789012345678901234567890".into()));
        assert!(matches!(
            read::<i64>(b"l123456789012345678901234567890;"),
            Err(Error::NumberOutOfRange { .. })
        ));
    }

    #[test]
    fn string_targets_coerce() {
        assert_eq!(read::<String>(b"i-12;").unwrap(), "-12");
        assert_eq!(read::<String>(b"t").unwrap(), "true");
        assert_eq!(read::<String>(b"d1.25;").unwrap(), "1.25");
        assert_eq!(read::<String>(b"D20240203;").unwrap(), "2024-02-03 00:00:00");
        let mut reader = Reader::new(b"s3\"abc\"r0;");
        assert_eq!(reader.read::<String>().unwrap(), "abc");
        assert_eq!(reader.read::<String>().unwrap(), "abc");
    }

    #[test]
    fn unknown_reference_fails() {
        assert_eq!(read::<Value>(b"r3;"), Err(Error::UnresolvedRef(3)));
        assert_eq!(read::<Value>(b"o0{}"), Err(Error::UnknownClass(0)));
    }

    #[test]
    fn truncated_list_is_unexpected_end() {
        assert_eq!(read::<Value>(b"a2{12"), Err(Error::UnexpectedEnd));
        assert!(matches!(
            read::<Value>(b"a2{123}"),
            Err(Error::InvalidTag { found: b'3', .. })
        ));
    }

    #[test]
    fn byte_targets_accept_lists() {
        assert_eq!(read::<ByteBuf>(b"b3\"abc\"").unwrap().0, b"abc");
        assert_eq!(read::<ByteBuf>(b"a3{12i200;}").unwrap().0, vec![1, 2, 200]);
        assert_eq!(read::<Vec<u8>>(b"b2\"hi\"").unwrap(), b"hi");
    }

    #[test]
    fn read_into_reuses_capacity_and_consumes_whole_list() {
        let mut dest: Vec<i32> = Vec::with_capacity(8);
        let mut reader = Reader::new(b"a3{123}5");
        reader.read_into(&mut dest).unwrap();
        assert_eq!(dest, vec![1, 2, 3]);
        assert_eq!(dest.capacity(), 8);
        assert_eq!(reader.read::<i32>().unwrap(), 5);
    }

    #[test]
    fn short_array_still_consumes_stream() {
        let mut reader = Reader::new(b"a3{123}4");
        let arr: [i32; 2] = reader.read().unwrap();
        assert_eq!(arr, [1, 2]);
        assert_eq!(reader.read::<i32>().unwrap(), 4);
    }

    #[test]
    fn dates_and_guids() {
        let ts: Timestamp = read(b"D20240203T040506.007Z").unwrap();
        assert!(ts.utc);
        assert_eq!(ts.naive.to_string(), "2024-02-03 04:05:06.007");
        let clock: Timestamp = read(b"T120001.000005;").unwrap();
        assert_eq!(clock.naive.to_string(), "1970-01-01 12:00:01.000005");
        let guid: Uuid = read(b"g{01234567-89ab-cdef-0123-456789abcdef}").unwrap();
        assert_eq!(guid, Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef));
    }

    #[test]
    fn option_reads_null() {
        assert_eq!(read::<Option<i32>>(b"n").unwrap(), None);
        assert_eq!(read::<Option<i32>>(b"3").unwrap(), Some(3));
    }

    #[test]
    fn astral_string_lengths() {
        let text: String = read("s3\"a😀\"".as_bytes()).unwrap();
        assert_eq!(text, "a😀");
    }
}
