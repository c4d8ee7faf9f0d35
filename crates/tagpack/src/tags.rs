//! # Wire Tags
//!
//! Every encoded unit starts with exactly one of these bytes. The digits
//! `'0'..='9'` double as inline small-integer literals.
//!
//! The assignment is fixed: encoder and decoder (and any peer speaking the
//! format) must agree on it byte for byte.

// Serialize tags
pub const INTEGER: u8 = b'i';
pub const LONG: u8 = b'l';
pub const DOUBLE: u8 = b'd';
pub const NULL: u8 = b'n';
pub const EMPTY: u8 = b'e';
pub const TRUE: u8 = b't';
pub const FALSE: u8 = b'f';
pub const NAN: u8 = b'N';
pub const INFINITY: u8 = b'I';
pub const DATE: u8 = b'D';
pub const TIME: u8 = b'T';
pub const UTC: u8 = b'Z';
pub const BYTES: u8 = b'b';
pub const UTF8_CHAR: u8 = b'u';
pub const STRING: u8 = b's';
pub const GUID: u8 = b'g';
pub const LIST: u8 = b'a';
pub const MAP: u8 = b'm';
pub const CLASS: u8 = b'c';
pub const OBJECT: u8 = b'o';
pub const REF: u8 = b'r';

// Serialize marks
pub const POS: u8 = b'+';
pub const NEG: u8 = b'-';
pub const SEMICOLON: u8 = b';';
pub const OPENBRACE: u8 = b'{';
pub const CLOSEBRACE: u8 = b'}';
pub const QUOTE: u8 = b'"';
pub const POINT: u8 = b'.';

// Protocol tags
pub const FUNCTIONS: u8 = b'F';
pub const CALL: u8 = b'C';
pub const RESULT: u8 = b'R';
pub const ARGUMENT: u8 = b'A';
pub const ERROR: u8 = b'E';
pub const END: u8 = b'z';

/// Returns true for the inline digit literals `'0'..='9'`.
#[inline]
pub const fn is_digit(tag: u8) -> bool {
    tag.is_ascii_digit()
}

/// Human readable name of a tag, used in diagnostics.
pub fn describe(tag: u8) -> String {
    let name = match tag {
        b'0'..=b'9' => return format!("digit '{}'", tag as char),
        INTEGER => "integer",
        LONG => "long",
        DOUBLE => "double",
        NULL => "null",
        EMPTY => "empty",
        TRUE => "true",
        FALSE => "false",
        NAN => "NaN",
        INFINITY => "infinity",
        DATE => "date",
        TIME => "time",
        BYTES => "bytes",
        UTF8_CHAR => "char",
        STRING => "string",
        GUID => "guid",
        LIST => "list",
        MAP => "map",
        CLASS => "class",
        OBJECT => "object",
        REF => "reference",
        _ => return format!("byte {:#04x}", tag),
    };
    format!("{} ('{}')", name, tag as char)
}
