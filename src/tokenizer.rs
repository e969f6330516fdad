//! Delimiter-based line splitting with typed fields.
//!
//! Lines are cut at a single delimiter character. A delimiter preceded by an odd number of
//! backslashes is escaped and stays part of the field, backslashes included. Numeric fields are
//! parsed permissively: parsing stops at the first unexpected character and whatever was read so
//! far is the result.
//!
//! ```
//! use paged_tdigest::tokenizer::{Field, FieldType, LineSplitter};
//!
//! let splitter = LineSplitter::new(',', vec![FieldType::Str, FieldType::Int]).unwrap();
//! assert_eq!(
//!     splitter.split("user,1000,x\n"),
//!     vec![
//!         Field::Str("user".to_owned()),
//!         Field::Int(1000),
//!         Field::Str("x".to_owned()),
//!     ]
//! );
//! ```
use std::io::{self, BufRead};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{DigestError, Result};

const ESCAPE: char = '\\';
const EOL: char = '\n';

/// Target type of one field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FieldType {
    /// Keep the raw text.
    #[default]
    Str,

    /// Parse as signed integer.
    Int,

    /// Parse as floating point number.
    Float,
}

/// One parsed field.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    /// Raw text.
    Str(String),

    /// Integer.
    Int(i64),

    /// Floating point number.
    Float(f64),
}

/// Splits lines into typed fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineSplitter {
    delimiter: char,
    types: Vec<FieldType>,
}

impl LineSplitter {
    /// Create splitter.
    ///
    /// `types[i]` is applied to the `i`-th field of every line; fields beyond `types` stay
    /// strings. The delimiter can neither be the escape character nor a line break.
    pub fn new(delimiter: char, types: Vec<FieldType>) -> Result<Self> {
        if delimiter == ESCAPE || delimiter == EOL {
            return Err(DigestError::Validation {
                what: "delimiter must not be a backslash or a line break",
            });
        }

        Ok(Self { delimiter, types })
    }

    /// Delimiter character.
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Field types.
    pub fn types(&self) -> &[FieldType] {
        &self.types
    }

    /// Split one line.
    ///
    /// Everything from the first line break on is ignored. An empty line yields a single empty
    /// field.
    pub fn split(&self, line: &str) -> Vec<Field> {
        let line = line.split_once(EOL).map_or(line, |(head, _)| head);

        let mut fields = Vec::new();
        let mut start = 0;
        let mut escapes = 0;
        for (i, c) in line.char_indices() {
            if c == self.delimiter && escapes % 2 == 0 {
                fields.push(self.convert(fields.len(), &line[start..i], false));
                start = i + c.len_utf8();
            }

            if c == ESCAPE {
                escapes += 1;
            } else {
                escapes = 0;
            }
        }
        fields.push(self.convert(fields.len(), &line[start..], true));
        fields
    }

    /// Split every line of `reader` and pass the fields to `callback`.
    ///
    /// Returns `true` if at least one line was read.
    pub fn cut<R, F>(&self, mut reader: R, mut callback: F) -> io::Result<bool>
    where
        R: BufRead,
        F: FnMut(Vec<Field>),
    {
        let mut processed = false;
        let mut line = String::new();

        while reader.read_line(&mut line)? > 0 {
            processed = true;
            callback(self.split(&line));
            line.clear();
        }
        Ok(processed)
    }

    fn convert(&self, index: usize, raw: &str, last: bool) -> Field {
        match self.types.get(index).copied().unwrap_or_default() {
            FieldType::Str => Field::Str(raw.to_owned()),
            FieldType::Int => Field::Int(parse_int(raw)),
            FieldType::Float => Field::Float(parse_float(raw, last)),
        }
    }
}

/// Optional `-`, then decimal digits up to the first other character.
fn parse_int(raw: &str) -> i64 {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let x = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0_i64, |acc, d| {
            acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
        });

    if negative { -x } else { x }
}

/// Like `parse_int` with leading spaces skipped and an optional fraction.
///
/// A leading `?` marks a missing value and yields `-1`. An empty field only counts as missing at
/// the end of the line (`last`); an empty field followed by a delimiter parses as `0`.
fn parse_float(raw: &str, last: bool) -> f64 {
    if raw.starts_with('?') || (raw.is_empty() && last) {
        return -1.;
    }

    let raw = raw.trim_start_matches(' ');
    let (sign, rest) = match raw.strip_prefix('-') {
        Some(rest) => (-1., rest),
        None => (1., raw),
    };

    let mut bytes = rest.bytes().peekable();
    let mut acc = 0.;
    while let Some(d) = bytes.next_if(u8::is_ascii_digit) {
        acc = acc * 10. + f64::from(d - b'0');
    }

    if bytes.next_if_eq(&b'.').is_some() {
        let mut k = 0.1;
        while let Some(d) = bytes.next_if(u8::is_ascii_digit) {
            acc += f64::from(d - b'0') * k;
            k *= 0.1;
        }
    }
    sign * acc
}
