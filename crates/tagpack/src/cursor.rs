use crate::types::Error;
use crate::types::Result;

/// A forward-only cursor over a borrowed buffer.
///
/// The cursor never copies. Every read returns a slice of the original
/// buffer, which lets the raw reader hand back exact byte spans.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    slice: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(slice: &'a [u8]) -> Self {
        Self { slice, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.slice.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The unread tail of the buffer.
    pub fn as_slice(&self) -> &'a [u8] {
        &self.slice[self.pos..]
    }

    /// A span of the underlying buffer, by absolute positions.
    pub fn span(&self, start: usize, end: usize) -> &'a [u8] {
        &self.slice[start..end]
    }

    #[inline]
    fn need(&self, n: usize) -> Result<()> {
        if self.pos + n > self.slice.len() {
            Err(Error::UnexpectedEnd)
        } else {
            Ok(())
        }
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.need(1)?;
        let byte = self.slice[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Steps back over the byte just read.
    pub fn unread_byte(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    pub fn peek_byte(&self) -> Result<u8> {
        self.need(1)?;
        Ok(self.slice[self.pos])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.need(len)?;
        let slice = &self.slice[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.need(len)?;
        self.pos += len;
        Ok(())
    }

    /// Reads one byte and fails unless it is `expected`.
    pub fn expect(&mut self, expected: u8, what: &'static str) -> Result<()> {
        let found = self.read_byte()?;
        if found != expected {
            return Err(Error::InvalidTag { found, expected: what });
        }
        Ok(())
    }

    /// Returns the bytes up to `delim` and consumes the delimiter.
    pub fn read_until(&mut self, delim: u8) -> Result<&'a [u8]> {
        let rest = &self.slice[self.pos..];
        let Some(offset) = rest.iter().position(|&b| b == delim) else {
            return Err(Error::UnexpectedEnd);
        };
        let run = &rest[..offset];
        self.pos += offset + 1;
        Ok(run)
    }

    /// Reads a decimal integer terminated by `delim`. An empty run reads as 0,
    /// which is how counts of zero are written (`a{}`).
    pub fn read_int(&mut self, delim: u8) -> Result<i64> {
        let run = self.read_until(delim)?;
        parse_i64(run)
    }

    /// Reads a non-negative count terminated by `delim`.
    pub fn read_count(&mut self, delim: u8) -> Result<usize> {
        let n = self.read_int(delim)?;
        usize::try_from(n).map_err(|_| Error::Malformed(format!("negative count {}", n)))
    }

    /// Reads `units` UTF-16 code units worth of UTF-8 text.
    ///
    /// Four byte sequences (outside the Basic Multilingual Plane) count as two
    /// units, matching the length prefix the writer emits.
    pub fn read_utf16_units(&mut self, units: usize) -> Result<&'a str> {
        let start = self.pos;
        let end = self.scan_utf16_units(units)?;
        self.pos = end;
        std::str::from_utf8(&self.slice[start..end]).map_err(|_| Error::InvalidUtf8)
    }

    /// Like `read_utf16_units` without validating, for pass-through reads.
    pub fn skip_utf16_units(&mut self, units: usize) -> Result<()> {
        self.pos = self.scan_utf16_units(units)?;
        Ok(())
    }

    fn scan_utf16_units(&self, units: usize) -> Result<usize> {
        let mut p = self.pos;
        let mut counted = 0;
        while counted < units {
            let Some(&lead) = self.slice.get(p) else {
                return Err(Error::UnexpectedEnd);
            };
            let (width, weight) = match lead >> 4 {
                0..=7 => (1, 1),
                12 | 13 => (2, 1),
                14 => (3, 1),
                15 => (4, 2),
                _ => return Err(Error::InvalidUtf8),
            };
            p += width;
            counted += weight;
        }
        if counted != units {
            return Err(Error::Malformed("string length splits a surrogate pair".into()));
        }
        if p > self.slice.len() {
            return Err(Error::UnexpectedEnd);
        }
        Ok(p)
    }

    /// Width in bytes of the UTF-8 sequence starting at the cursor.
    pub fn utf8_width(&self) -> Result<usize> {
        let lead = self.peek_byte()?;
        match lead >> 4 {
            0..=7 => Ok(1),
            12 | 13 => Ok(2),
            14 => Ok(3),
            15 => Ok(4),
            _ => Err(Error::InvalidUtf8),
        }
    }
}

pub(crate) fn parse_i64(run: &[u8]) -> Result<i64> {
    if run.is_empty() {
        return Ok(0);
    }
    let text = std::str::from_utf8(run).map_err(|_| Error::InvalidUtf8)?;
    text.parse::<i64>()
        .map_err(|_| Error::Malformed(format!("bad integer {:?}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_basic() {
        let data = b"hello world";
        let mut cursor = ByteCursor::new(data);

        assert_eq!(cursor.pos(), 0);
        assert_eq!(cursor.remaining(), 11);

        let bytes = cursor.read_bytes(5).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(cursor.pos(), 5);
    }

    #[test]
    fn cursor_unread() {
        let mut cursor = ByteCursor::new(b"ab");
        assert_eq!(cursor.read_byte().unwrap(), b'a');
        cursor.unread_byte();
        assert_eq!(cursor.read_byte().unwrap(), b'a');
        assert_eq!(cursor.read_byte().unwrap(), b'b');
        assert_eq!(cursor.read_byte(), Err(Error::UnexpectedEnd));
    }

    #[test]
    fn cursor_read_until() {
        let mut cursor = ByteCursor::new(b"123;45{");
        assert_eq!(cursor.read_int(b';').unwrap(), 123);
        assert_eq!(cursor.read_count(b'{').unwrap(), 45);
        assert!(cursor.is_empty());
    }

    #[test]
    fn cursor_empty_count_is_zero() {
        let mut cursor = ByteCursor::new(b"{");
        assert_eq!(cursor.read_count(b'{').unwrap(), 0);
    }

    #[test]
    fn cursor_missing_delimiter() {
        let mut cursor = ByteCursor::new(b"123");
        assert_eq!(cursor.read_int(b';'), Err(Error::UnexpectedEnd));
    }

    #[test]
    fn cursor_utf16_units() {
        // 'é' is two bytes, one unit; the emoji is four bytes, two units.
        let text = "aé😀b";
        let mut cursor = ByteCursor::new(text.as_bytes());
        assert_eq!(cursor.read_utf16_units(5).unwrap(), text);
        assert!(cursor.is_empty());
    }

    #[test]
    fn cursor_utf16_units_truncated() {
        let mut cursor = ByteCursor::new("ab".as_bytes());
        assert_eq!(cursor.read_utf16_units(3), Err(Error::UnexpectedEnd));
    }
}
