//! Self-describing tagged parameter frames.
//!
//! A tagged frame is a flat little-endian byte blob of entries, each a
//! tag string plus either a vector of f64 or a string payload. The format
//! is only meant for in-memory transport between operators and the host
//! within one session; there are no cross-version guarantees.
//!
//! Entry layout: `[type: u8][tag_len: u16][tag bytes][payload_len: u32][payload]`
//! where a vector payload is `payload_len` f64 values stored unaligned.

use core::fmt;

const TYPE_VECTOR: u8 = 0;
const TYPE_STRING: u8 = 1;
const HEADER_LEN: usize = 1 + 2 + 4;

/// Bytes needed for an entry holding `values` f64s under `tag`.
pub fn vector_entry_size(tag: &str, values: usize) -> usize {
    HEADER_LEN + tag.len() + values * size_of::<f64>()
}

/// Bytes needed for an entry holding the string `s` under `tag`.
pub fn string_entry_size(tag: &str, s: &str) -> usize {
    HEADER_LEN + tag.len() + s.len()
}

/// Errors from writing into a fixed-size tagged region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggedError {
    /// The destination region is too small for the entry.
    NoSpace,
    /// The tag is longer than a u16 can describe.
    TagTooLong,
}
impl fmt::Display for TaggedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaggedError::NoSpace => write!(f, "tagged frame region too small for entry"),
            TaggedError::TagTooLong => write!(f, "tag exceeds the maximum length of 65535 bytes"),
        }
    }
}
impl core::error::Error for TaggedError {}

/// Appends entries into a caller-provided byte region.
pub struct TaggedWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> TaggedWriter<'a> {
    #[allow(missing_docs)]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn used(&self) -> usize {
        self.pos
    }

    /// Append a vector entry.
    pub fn write_vector(&mut self, tag: &str, values: &[f64]) -> Result<(), TaggedError> {
        self.header(TYPE_VECTOR, tag, values.len())?;
        for v in values {
            self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
            self.pos += 8;
        }
        Ok(())
    }

    /// Append a string entry.
    pub fn write_string(&mut self, tag: &str, s: &str) -> Result<(), TaggedError> {
        self.header(TYPE_STRING, tag, s.len())?;
        self.buf[self.pos..self.pos + s.len()].copy_from_slice(s.as_bytes());
        self.pos += s.len();
        Ok(())
    }

    /// Append every entry of another tagged frame.
    pub fn write_all(&mut self, other: TaggedRef<'_>) -> Result<(), TaggedError> {
        for entry in other.iter() {
            match entry.value {
                TaggedValue::Vector(v) => {
                    self.header(TYPE_VECTOR, entry.tag, v.len())?;
                    for i in 0..v.len() {
                        self.buf[self.pos..self.pos + 8]
                            .copy_from_slice(&v.get(i).unwrap_or(0.0).to_le_bytes());
                        self.pos += 8;
                    }
                }
                TaggedValue::Str(s) => self.write_string(entry.tag, s)?,
            }
        }
        Ok(())
    }

    fn header(&mut self, ty: u8, tag: &str, payload_items: usize) -> Result<(), TaggedError> {
        if tag.len() > u16::MAX as usize {
            return Err(TaggedError::TagTooLong);
        }
        let payload_bytes = if ty == TYPE_VECTOR {
            payload_items * size_of::<f64>()
        } else {
            payload_items
        };
        let total = HEADER_LEN + tag.len() + payload_bytes;
        if self.buf.len() - self.pos < total {
            return Err(TaggedError::NoSpace);
        }
        self.buf[self.pos] = ty;
        self.pos += 1;
        self.buf[self.pos..self.pos + 2].copy_from_slice(&(tag.len() as u16).to_le_bytes());
        self.pos += 2;
        self.buf[self.pos..self.pos + 4].copy_from_slice(&(payload_items as u32).to_le_bytes());
        self.pos += 4;
        self.buf[self.pos..self.pos + tag.len()].copy_from_slice(tag.as_bytes());
        self.pos += tag.len();
        Ok(())
    }
}

/// Read-only view over the bytes of a tagged frame.
#[derive(Copy, Clone, Debug)]
pub struct TaggedRef<'a> {
    buf: &'a [u8],
}

/// Unaligned view over the f64 payload of a vector entry.
#[derive(Copy, Clone, Debug)]
pub struct VectorRef<'a> {
    bytes: &'a [u8],
}
impl<'a> VectorRef<'a> {
    /// Number of values in the entry.
    pub fn len(&self) -> usize {
        self.bytes.len() / 8
    }
    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
    /// The value at `i`, if in range.
    pub fn get(&self, i: usize) -> Option<f64> {
        let start = i.checked_mul(8)?;
        let bytes = self.bytes.get(start..start + 8)?;
        Some(f64::from_le_bytes(bytes.try_into().ok()?))
    }
    /// Iterate over all values.
    pub fn iter(&self) -> impl Iterator<Item = f64> + 'a {
        let bytes = self.bytes;
        bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
    }
    /// Copy the values into a freshly allocated Vec.
    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }
}

/// A decoded entry value.
#[derive(Copy, Clone, Debug)]
pub enum TaggedValue<'a> {
    #[allow(missing_docs)]
    Vector(VectorRef<'a>),
    #[allow(missing_docs)]
    Str(&'a str),
}

/// One decoded entry.
#[derive(Copy, Clone, Debug)]
pub struct TaggedEntry<'a> {
    #[allow(missing_docs)]
    pub tag: &'a str,
    #[allow(missing_docs)]
    pub value: TaggedValue<'a>,
}

impl<'a> TaggedRef<'a> {
    /// View `buf` as a tagged frame. The slice must cover exactly the
    /// written region; iteration stops at the first malformed entry.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Total size of the region in bytes.
    pub fn len_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Iterate over the entries in write order.
    pub fn iter(&self) -> TaggedIter<'a> {
        TaggedIter {
            buf: self.buf,
            pos: 0,
        }
    }

    /// The first entry with the given tag, if any.
    pub fn find(&self, tag: &str) -> Option<TaggedValue<'a>> {
        self.iter().find(|e| e.tag == tag).map(|e| e.value)
    }

    /// Convenience: the first vector entry under `tag`.
    pub fn find_vector(&self, tag: &str) -> Option<VectorRef<'a>> {
        match self.find(tag)? {
            TaggedValue::Vector(v) => Some(v),
            TaggedValue::Str(_) => None,
        }
    }

    /// Convenience: the first value of the first vector entry under `tag`.
    pub fn find_value(&self, tag: &str) -> Option<f64> {
        self.find_vector(tag)?.get(0)
    }

    /// Convenience: the first string entry under `tag`.
    pub fn find_string(&self, tag: &str) -> Option<&'a str> {
        match self.find(tag)? {
            TaggedValue::Str(s) => Some(s),
            TaggedValue::Vector(_) => None,
        }
    }
}

/// Iterator over the entries of a [`TaggedRef`].
pub struct TaggedIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for TaggedIter<'a> {
    type Item = TaggedEntry<'a>;

    fn next(&mut self) -> Option<TaggedEntry<'a>> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let rest = &self.buf[self.pos..];
        if rest.len() < HEADER_LEN {
            return None;
        }
        let ty = rest[0];
        let tag_len = u16::from_le_bytes(rest[1..3].try_into().unwrap()) as usize;
        let payload_items = u32::from_le_bytes(rest[3..7].try_into().unwrap()) as usize;
        let payload_bytes = if ty == TYPE_VECTOR {
            payload_items.checked_mul(8)?
        } else {
            payload_items
        };
        let tag_end = HEADER_LEN.checked_add(tag_len)?;
        let entry_end = tag_end.checked_add(payload_bytes)?;
        if entry_end > rest.len() {
            return None;
        }
        let tag = core::str::from_utf8(&rest[HEADER_LEN..tag_end]).ok()?;
        let payload = &rest[tag_end..entry_end];
        let value = match ty {
            TYPE_VECTOR => TaggedValue::Vector(VectorRef { bytes: payload }),
            TYPE_STRING => TaggedValue::Str(core::str::from_utf8(payload).ok()?),
            _ => return None,
        };
        self.pos += entry_end;
        Some(TaggedEntry { tag, value })
    }
}

/// Growable owned tagged frame for host-side construction.
#[derive(Clone, Debug, Default)]
pub struct TaggedBuf {
    bytes: Vec<u8>,
}

impl TaggedBuf {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self::default()
    }
    /// Append a vector entry.
    pub fn push_vector(&mut self, tag: &str, values: &[f64]) {
        let start = self.bytes.len();
        self.bytes
            .resize(start + vector_entry_size(tag, values.len()), 0);
        let mut w = TaggedWriter::new(&mut self.bytes[start..]);
        // The region was sized for exactly this entry.
        w.write_vector(tag, values)
            .expect("sized for the entry above");
    }
    /// Append a string entry.
    pub fn push_string(&mut self, tag: &str, s: &str) {
        let start = self.bytes.len();
        self.bytes.resize(start + string_entry_size(tag, s), 0);
        let mut w = TaggedWriter::new(&mut self.bytes[start..]);
        w.write_string(tag, s).expect("sized for the entry above");
    }
    /// Read-only view of the frame.
    pub fn as_ref(&self) -> TaggedRef<'_> {
        TaggedRef::new(&self.bytes)
    }
    /// Total size in bytes.
    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_find() {
        let mut buf = vec![0u8; 256];
        let mut w = TaggedWriter::new(&mut buf);
        w.write_vector("freq", &[440.0, 880.0]).unwrap();
        w.write_string("mode", "wrap").unwrap();
        let used = w.used();

        let r = TaggedRef::new(&buf[..used]);
        let freq = r.find_vector("freq").unwrap();
        assert_eq!(freq.len(), 2);
        assert_eq!(freq.get(1), Some(880.0));
        assert_eq!(r.find_string("mode"), Some("wrap"));
        assert_eq!(r.find("missing").map(|_| ()), None);
    }

    #[test]
    fn writer_reports_exhaustion() {
        let mut buf = vec![0u8; 16];
        let mut w = TaggedWriter::new(&mut buf);
        assert_eq!(
            w.write_vector("t", &[1.0, 2.0, 3.0]),
            Err(TaggedError::NoSpace)
        );
        // Nothing half-written.
        assert_eq!(w.used(), 0);
    }

    #[test]
    fn truncated_region_stops_iteration() {
        let mut owned = TaggedBuf::new();
        owned.push_vector("a", &[1.0]);
        owned.push_vector("b", &[2.0]);
        let full = owned.as_ref();
        assert_eq!(full.iter().count(), 2);
        // Chop the last byte off: the second entry no longer parses.
        let bytes = &owned.bytes[..owned.bytes.len() - 1];
        assert_eq!(TaggedRef::new(bytes).iter().count(), 1);
    }
}
