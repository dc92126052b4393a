//! Record line codec.
//!
//! Encodes one record to one comma-delimited line and back. Fields carrying
//! the delimiter, the quote character, or a newline are wrapped in quotes
//! with inner quotes doubled (standard CSV escaping). A malformed line is an
//! error for that line only; scanners log it and move on.

use tally_core::{CodecError, FlatRecord};

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// Quote a single field value if it needs quoting.
fn encode_field(value: &str) -> String {
    let needs_quoting = value
        .chars()
        .any(|c| c == DELIMITER || c == QUOTE || c == '\n' || c == '\r');
    if !needs_quoting {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push(QUOTE);
    for c in value.chars() {
        if c == QUOTE {
            out.push(QUOTE);
        }
        out.push(c);
    }
    out.push(QUOTE);
    out
}

/// Encode an ordered row of raw field values to one record line.
pub fn encode_fields(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| encode_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Split a record line into raw field values, respecting quoted sections.
///
/// Returns an error when a quote is left unclosed or the field count does
/// not match `expected`.
pub fn split_line(line: &str, expected: usize) -> Result<Vec<String>, CodecError> {
    let mut fields = Vec::with_capacity(expected);
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == QUOTE {
                if chars.peek() == Some(&QUOTE) {
                    // Doubled quote: literal quote character.
                    chars.next();
                    current.push(QUOTE);
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                QUOTE if current.is_empty() => in_quotes = true,
                DELIMITER => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
    }

    if in_quotes {
        return Err(CodecError::UnclosedQuote);
    }
    fields.push(current);

    if fields.len() != expected {
        return Err(CodecError::FieldCount {
            expected,
            got: fields.len(),
        });
    }
    Ok(fields)
}

/// Encode a record to its store-file line.
pub fn encode_record<R: FlatRecord>(record: &R) -> String {
    encode_fields(&record.to_fields())
}

/// Decode a store-file line into a record.
pub fn decode_record<R: FlatRecord>(line: &str) -> Result<R, CodecError> {
    let fields = split_line(line, R::FIELD_COUNT)?;
    R::from_fields(&fields)
}

/// Split file content into logical record lines.
///
/// A quoted field may carry a newline, so a logical record can span physical
/// lines; the splitter breaks on newlines outside quoted sections only.
/// Quoting follows the same discipline as [`split_line`]: a quote only opens
/// a quoted section at the start of a field, and doubled quotes inside one
/// are literal. A stray quote mid-field is therefore just a character, so a
/// hand-mangled line cannot absorb the valid records after it.
/// Trailing carriage returns are stripped and callers skip blank entries.
pub fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut field_start = true;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            current.push(c);
            if c == QUOTE {
                if chars.peek() == Some(&QUOTE) {
                    chars.next();
                    current.push(QUOTE);
                } else {
                    in_quotes = false;
                }
            }
            continue;
        }
        match c {
            QUOTE if field_start => {
                in_quotes = true;
                field_start = false;
                current.push(c);
            }
            DELIMITER => {
                field_start = true;
                current.push(c);
            }
            '\n' => {
                if current.ends_with('\r') {
                    current.pop();
                }
                lines.push(std::mem::take(&mut current));
                field_start = true;
            }
            _ => {
                field_start = false;
                current.push(c);
            }
        }
    }
    if current.ends_with('\r') {
        current.pop();
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
