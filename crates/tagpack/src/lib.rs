//! # Tagpack
//!
//! A self-describing binary value format. Every value starts with one tag
//! byte; small integers are a single digit; strings, bytes, lists, maps and
//! objects are length prefixed and delimited. Repeated strings and shared
//! containers are written once and referenced by index afterwards, so
//! shared and cyclic graphs round-trip with their identity intact.
//!
//! - [`Writer`] / [`Encode`] serialize.
//! - [`Reader`] / [`Decode`] deserialize, dispatching on the tag per target.
//! - [`Value`] is the dynamic form, with [`FromValue`] for lenient conversion.
//! - [`ClassRegistry`] caches class definitions for [`Record`] types.

#[macro_use]
mod macros;

pub mod class;
pub mod cursor;
pub mod raw;
pub mod reader;
pub mod tags;
pub mod types;
pub mod value;
pub mod writer;

pub use types::Error;
pub use types::Result;

pub use cursor::ByteCursor;

pub use value::ByteBuf;
pub use value::Complex;
pub use value::FromValue;
pub use value::List;
pub use value::Map;
pub use value::Object;
pub use value::Timestamp;
pub use value::Value;

pub use writer::Encode;
pub use writer::Writer;

pub use reader::Decode;
pub use reader::DispatchTable;
pub use reader::Reader;

pub use class::ClassDescriptor;
pub use class::ClassRegistry;
pub use class::Fields;
pub use class::Record;

/// Serializes one value with a fresh writer.
pub fn serialize<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut writer = Writer::new();
    writer.write(value)?;
    Ok(writer.into_bytes())
}

/// Serializes without back references.
pub fn serialize_simple<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut writer = Writer::simple();
    writer.write(value)?;
    Ok(writer.into_bytes())
}

/// Deserializes one value with a fresh reader.
pub fn unserialize<T: Decode>(bytes: &[u8]) -> Result<T> {
    Reader::new(bytes).read()
}

#[cfg(test)]
mod tests;
