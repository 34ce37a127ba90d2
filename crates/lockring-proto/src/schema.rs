//! Fixed-width payload layouts.
//!
//! Each payload is described once as an ordered list of named fields. The same
//! [`Schema`] value drives both [`Schema::split`] and [`Schema::join`], so no
//! offset is ever computed by hand at a call site.

use crate::errors::{ProtocolError, Result};

/// A named fixed-width field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name, used in error messages
    pub name: &'static str,
    /// Exact width in bytes
    pub width: usize,
}

impl Field {
    /// Declare a field.
    pub const fn new(name: &'static str, width: usize) -> Self {
        Self { name, width }
    }
}

/// Ordered list of fixed-width fields, optionally followed by a single
/// variable-length tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    name: &'static str,
    fields: &'static [Field],
    tail: Option<&'static str>,
}

impl Schema {
    /// A layout made only of fixed-width fields.
    pub const fn fixed(name: &'static str, fields: &'static [Field]) -> Self {
        Self { name, fields, tail: None }
    }

    /// A layout whose fixed fields are followed by a variable-length tail.
    pub const fn with_tail(
        name: &'static str,
        fields: &'static [Field],
        tail: &'static str,
    ) -> Self {
        Self { name, fields, tail: Some(tail) }
    }

    /// Schema name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Total width of the fixed fields.
    pub const fn fixed_len(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < self.fields.len() {
            total += self.fields[i].width;
            i += 1;
        }
        total
    }

    /// Number of parts `split` yields and `join` expects.
    pub const fn part_count(&self) -> usize {
        self.fields.len() + if self.tail.is_some() { 1 } else { 0 }
    }

    /// Split `bytes` into one slice per field (plus the tail, if any).
    ///
    /// # Errors
    ///
    /// - `PayloadLength`: the input is not exactly the fixed width (or, with a
    ///   tail, shorter than it)
    pub fn split<'a>(&self, bytes: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        let fixed = self.fixed_len();
        let length_ok = match self.tail {
            Some(_) => bytes.len() >= fixed,
            None => bytes.len() == fixed,
        };
        if !length_ok {
            return Err(ProtocolError::PayloadLength {
                schema: self.name,
                expected: fixed,
                actual: bytes.len(),
            });
        }

        let mut parts = Vec::with_capacity(self.part_count());
        let mut rest = bytes;
        for field in self.fields {
            let (head, tail) = rest.split_at(field.width);
            parts.push(head);
            rest = tail;
        }
        if self.tail.is_some() {
            parts.push(rest);
        }
        Ok(parts)
    }

    /// Concatenate `parts` in field order, checking every width.
    ///
    /// # Errors
    ///
    /// - `FieldCount`: wrong number of parts
    /// - `FieldLength`: a fixed part has the wrong width
    pub fn join(&self, parts: &[&[u8]]) -> Result<Vec<u8>> {
        if parts.len() != self.part_count() {
            return Err(ProtocolError::FieldCount {
                schema: self.name,
                expected: self.part_count(),
                actual: parts.len(),
            });
        }

        let tail_len = if self.tail.is_some() { parts[self.fields.len()].len() } else { 0 };
        let mut out = Vec::with_capacity(self.fixed_len() + tail_len);
        for (field, part) in self.fields.iter().zip(parts) {
            if part.len() != field.width {
                return Err(ProtocolError::FieldLength {
                    field: field.name,
                    expected: field.width,
                    actual: part.len(),
                });
            }
            out.extend_from_slice(part);
        }
        if self.tail.is_some() {
            out.extend_from_slice(parts[self.fields.len()]);
        }
        Ok(out)
    }
}

/// Copy a split part into an array. `split` already fixed the width, so a
/// mismatch here means the schema and the payload type disagree.
pub(crate) fn array<const N: usize>(part: &[u8], field: &'static str) -> Result<[u8; N]> {
    <[u8; N]>::try_from(part).map_err(|_| ProtocolError::FieldLength {
        field,
        expected: N,
        actual: part.len(),
    })
}
