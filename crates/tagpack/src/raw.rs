//! Raw reads: copy out the exact bytes of one encoded value without
//! materializing it, for proxying a sub-message through untouched.
//!
//! Nothing is registered in a reference table, so a raw span is only
//! self-contained if it holds no back references to earlier values.

use crate::cursor::ByteCursor;
use crate::tags;
use crate::types::Error;
use crate::types::Result;
use crate::writer::MAX_DEPTH;

/// Returns the span of the next value and advances past it.
pub fn read_raw<'a>(cursor: &mut ByteCursor<'a>) -> Result<&'a [u8]> {
    let start = cursor.pos();
    skip_value(cursor, 0)?;
    Ok(cursor.span(start, cursor.pos()))
}

fn skip_value(cursor: &mut ByteCursor<'_>, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::RecursionLimitExceeded);
    }
    let tag = cursor.read_byte()?;
    match tag {
        b'0'..=b'9' | tags::NULL | tags::EMPTY | tags::TRUE | tags::FALSE | tags::NAN => Ok(()),
        tags::INFINITY => match cursor.read_byte()? {
            tags::POS | tags::NEG => Ok(()),
            found => Err(Error::InvalidTag { found, expected: "infinity sign" }),
        },
        tags::INTEGER | tags::LONG | tags::DOUBLE | tags::REF => {
            cursor.read_until(tags::SEMICOLON).map(|_| ())
        }
        tags::UTF8_CHAR => {
            let width = cursor.utf8_width()?;
            cursor.skip(width)
        }
        tags::STRING => {
            let units = cursor.read_count(tags::QUOTE)?;
            cursor.skip_utf16_units(units)?;
            cursor.expect(tags::QUOTE, "closing quote")
        }
        tags::BYTES => {
            let len = cursor.read_count(tags::QUOTE)?;
            cursor.skip(len)?;
            cursor.expect(tags::QUOTE, "closing quote")
        }
        tags::GUID => {
            cursor.expect(tags::OPENBRACE, "guid open brace")?;
            cursor.skip(36)?;
            cursor.expect(tags::CLOSEBRACE, "guid close brace")
        }
        tags::DATE | tags::TIME => loop {
            match cursor.read_byte()? {
                tags::UTC | tags::SEMICOLON => return Ok(()),
                b if b.is_ascii_digit() || b == tags::TIME || b == tags::POINT => {}
                found => return Err(Error::InvalidTag { found, expected: "date terminator" }),
            }
        },
        tags::LIST | tags::MAP | tags::OBJECT => {
            cursor.read_until(tags::OPENBRACE)?;
            skip_body(cursor, depth)
        }
        tags::CLASS => {
            let units = cursor.read_count(tags::QUOTE)?;
            cursor.skip_utf16_units(units)?;
            cursor.expect(tags::QUOTE, "closing quote")?;
            cursor.read_until(tags::OPENBRACE)?;
            skip_body(cursor, depth)?;
            // A class definition is always followed by the value using it.
            skip_value(cursor, depth)
        }
        found => Err(Error::InvalidTag { found, expected: "value tag" }),
    }
}

/// Skips values until the matching close brace.
fn skip_body(cursor: &mut ByteCursor<'_>, depth: usize) -> Result<()> {
    loop {
        if cursor.peek_byte()? == tags::CLOSEBRACE {
            return cursor.skip(1);
        }
        skip_value(cursor, depth + 1)?;
    }
}
