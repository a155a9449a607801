//! Input side of the JSON readers. serde_json pulls bytes one at a time
//! through [`Tracked`], which keeps a [`Cursor`] the table visitors use to
//! position the errors they report themselves.

use std::cell::Cell;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 0 }
    }
}

impl Position {
    fn advance(&mut self, bytes: &[u8]) {
        for byte in bytes {
            if *byte == b'\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Position of the last byte handed to the deserializer.
#[derive(Debug, Clone, Default)]
pub struct Cursor(Rc<Cell<Position>>);

impl Cursor {
    pub fn position(&self) -> Position {
        self.0.get()
    }

    fn advance(&self, bytes: &[u8]) {
        let mut position = self.0.get();
        position.advance(bytes);
        self.0.set(position);
    }
}

pub struct Tracked<R> {
    inner: BufReader<R>,
    cursor: Cursor,
}

impl<R: Read> Tracked<R> {
    pub fn new(input: R) -> Self {
        Self {
            inner: BufReader::new(input),
            cursor: Cursor::default(),
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor.clone()
    }

    /// Consumes leading JSON whitespace. Returns false if nothing else is left.
    pub fn skip_whitespace(&mut self) -> io::Result<bool> {
        loop {
            let buf = self.inner.fill_buf()?;
            if buf.is_empty() {
                return Ok(false);
            }
            let blank = buf
                .iter()
                .take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
                .count();
            let more = blank < buf.len();
            self.cursor.advance(&buf[..blank]);
            self.inner.consume(blank);
            if more {
                return Ok(true);
            }
        }
    }
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cursor.advance(&buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_follows_reads() {
        let mut source = Tracked::new("  \n  [1]".as_bytes());
        let cursor = source.cursor();
        assert!(source.skip_whitespace().unwrap());
        assert_eq!(cursor.position(), Position { line: 2, column: 2 });

        let mut byte = [0u8; 1];
        source.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], b'[');
        assert_eq!(cursor.position().to_string(), "line 2, column 3");
    }

    #[test]
    fn test_blank_input_has_nothing_left() {
        let mut source = Tracked::new(" \r\n\t".as_bytes());
        assert!(!source.skip_whitespace().unwrap());
        assert!(!Tracked::new(&b""[..]).skip_whitespace().unwrap());
    }
}
