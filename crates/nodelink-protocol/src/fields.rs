//! The tag map: a generic, schema-less view of one protobuf-style message.
//!
//! Every field on the wire is prefixed by a varint "tag":
//!
//! ```text
//!   tag = (field_number << 3) | wire_type
//! ```
//!
//! The wire type says how many bytes follow, so a reader can walk a
//! message without knowing what the fields mean. [`TagMap::decode`] does
//! exactly that and hands back field number → [`FieldValue`]. The typed
//! accessors (`uint`, `float`, `string`, …) then interpret a value the way
//! a particular message layout says it should be read, and fail with
//! [`ProtocolError::FieldType`] when the wire disagrees.
//!
//! Encoding goes the other way: the `with_*` builder methods record a value
//! together with its wire type, so nothing is inferred from the runtime
//! kind of a value. Default values (zero, `false`, empty) are left out, the
//! same as any proto3 encoder.
//!
//! Nested messages and packed repeated fields are not supported. Repeated
//! scalars/strings are kept in arrival order and can be read back with the
//! list accessors.

use std::collections::BTreeMap;
use std::fmt;

use crate::ProtocolError;
use crate::varint::{decode_varint, encode_varint, size_of_varint, zigzag_decode};

// ---------------------------------------------------------------------------
// WireType
// ---------------------------------------------------------------------------

/// The low three bits of a field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    /// Parses the 3-bit wire type code. Groups (3, 4) and the unassigned
    /// codes return `None`.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Varint),
            1 => Some(Self::Fixed64),
            2 => Some(Self::LengthDelimited),
            5 => Some(Self::Fixed32),
            _ => None,
        }
    }

    /// The 3-bit code written into a tag.
    pub fn bits(self) -> u8 {
        match self {
            Self::Varint => 0,
            Self::Fixed64 => 1,
            Self::LengthDelimited => 2,
            Self::Fixed32 => 5,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Varint => "varint",
            Self::Fixed64 => "fixed64",
            Self::LengthDelimited => "length-delimited",
            Self::Fixed32 => "fixed32",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// One decoded field, exactly as it appeared on the wire.
///
/// Fixed-width values keep their raw bit pattern; turning a `Fixed32` into
/// an `f32` is the caller's decision (see [`TagMap::float`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Varint(u64),
    Fixed32(u32),
    Fixed64(u64),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// The wire type this value is encoded with.
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Varint(_) => WireType::Varint,
            Self::Fixed32(_) => WireType::Fixed32,
            Self::Fixed64(_) => WireType::Fixed64,
            Self::Bytes(_) => WireType::LengthDelimited,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Varint(v) => size_of_varint(*v),
            Self::Fixed32(_) => 4,
            Self::Fixed64(_) => 8,
            Self::Bytes(b) => size_of_varint(b.len() as u64) + b.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// TagMap
// ---------------------------------------------------------------------------

/// Field number → value(s) for a single message.
///
/// Lives only for one decode (or encode) pass; the dispatcher converts it
/// into a typed record right away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    fields: BTreeMap<u32, Vec<FieldValue>>,
}

impl TagMap {
    /// An empty map. Also what a zero-length message decodes to.
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks `payload` field by field until it is used up.
    ///
    /// The payload slice is the whole byte budget for this message; each
    /// field's tag, length prefix and body are consumed from it in turn.
    ///
    /// A length-delimited field that declares more bytes than remain is
    /// kept with whatever bytes were available and logged; decoding then
    /// ends because the budget is exhausted.
    ///
    /// # Errors
    /// - [`ProtocolError::UnknownWireType`]: the rest of the message
    ///   cannot be located, so the whole message is rejected.
    /// - [`ProtocolError::Truncated`]: a fixed32/fixed64 body was cut
    ///   short.
    pub fn decode(mut payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut map = Self::new();

        while let Some(tag) = decode_varint(&mut payload, true) {
            let field = (tag >> 3) as u32;
            let bits = (tag & 0x07) as u8;

            let Some(wire_type) = WireType::from_bits(bits) else {
                tracing::warn!(
                    field,
                    wire_type = bits,
                    "unknown wire type, abandoning message"
                );
                return Err(ProtocolError::UnknownWireType {
                    field,
                    wire_type: bits,
                });
            };

            let value = match wire_type {
                WireType::Varint => FieldValue::Varint(
                    decode_varint(&mut payload, false).unwrap_or_default(),
                ),
                WireType::Fixed32 => FieldValue::Fixed32(u32::from_le_bytes(
                    take_array(&mut payload, field)?,
                )),
                WireType::Fixed64 => FieldValue::Fixed64(u64::from_le_bytes(
                    take_array(&mut payload, field)?,
                )),
                WireType::LengthDelimited => {
                    let declared = decode_varint(&mut payload, false)
                        .unwrap_or_default()
                        as usize;
                    let len = declared.min(payload.len());
                    if len < declared {
                        tracing::warn!(
                            field,
                            declared,
                            available = len,
                            "length-delimited field truncated, keeping partial data"
                        );
                    }
                    let (body, rest) = payload.split_at(len);
                    payload = rest;
                    FieldValue::Bytes(body.to_vec())
                }
            };

            map.push(field, value);
        }

        Ok(map)
    }

    /// Serialises every field in ascending field-number order. Repeated
    /// occurrences are written in the order they were added.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Appends the encoded fields to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        for (&field, values) in &self.fields {
            for value in values {
                let tag = (u64::from(field) << 3)
                    | u64::from(value.wire_type().bits());
                encode_varint(tag, out);
                match value {
                    FieldValue::Varint(v) => {
                        encode_varint(*v, out);
                    }
                    FieldValue::Fixed32(v) => {
                        out.extend_from_slice(&v.to_le_bytes())
                    }
                    FieldValue::Fixed64(v) => {
                        out.extend_from_slice(&v.to_le_bytes())
                    }
                    FieldValue::Bytes(b) => {
                        encode_varint(b.len() as u64, out);
                        out.extend_from_slice(b);
                    }
                }
            }
        }
    }

    /// Exact size of [`encode`](Self::encode)'s output, computed without
    /// encoding.
    pub fn encoded_len(&self) -> usize {
        self.fields
            .iter()
            .flat_map(|(&field, values)| {
                values.iter().map(move |v| {
                    size_of_varint(u64::from(field) << 3) + v.encoded_len()
                })
            })
            .sum()
    }

    /// Appends a value, keeping earlier occurrences of the same field.
    pub fn push(&mut self, field: u32, value: FieldValue) {
        self.fields.entry(field).or_default().push(value);
    }

    /// Replaces every occurrence of `field` with `value`.
    pub fn insert(&mut self, field: u32, value: FieldValue) {
        self.fields.insert(field, vec![value]);
    }

    /// The last occurrence of `field`, protobuf's "last one wins" rule.
    pub fn get(&self, field: u32) -> Option<&FieldValue> {
        self.fields.get(&field).and_then(|values| values.last())
    }

    /// Every occurrence of `field`, oldest first.
    pub fn get_all(&self, field: u32) -> &[FieldValue] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `field` appeared at all.
    pub fn contains(&self, field: u32) -> bool {
        self.fields.contains_key(&field)
    }

    /// Number of distinct field numbers present.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if no fields are present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    // -- Typed accessors ---------------------------------------------------
    //
    // Absent fields read as the type's default, matching proto3 where a
    // default value is never put on the wire.

    /// `uint32`/`uint64`/`enum` field.
    pub fn uint(&self, field: u32) -> Result<u64, ProtocolError> {
        match self.get(field) {
            None => Ok(0),
            Some(FieldValue::Varint(v)) => Ok(*v),
            Some(other) => Err(mismatch(field, WireType::Varint, other)),
        }
    }

    /// `uint32`/`enum` field, truncated to 32 bits.
    pub fn uint32(&self, field: u32) -> Result<u32, ProtocolError> {
        self.uint(field).map(|v| v as u32)
    }

    /// `int32` field. Negative values arrive sign-extended to 64 bits.
    pub fn int32(&self, field: u32) -> Result<i32, ProtocolError> {
        self.uint(field).map(|v| v as i32)
    }

    /// `sint32`/`sint64` field (zigzag encoded).
    pub fn sint(&self, field: u32) -> Result<i64, ProtocolError> {
        self.uint(field).map(zigzag_decode)
    }

    /// `bool` field.
    pub fn boolean(&self, field: u32) -> Result<bool, ProtocolError> {
        self.uint(field).map(|v| v != 0)
    }

    /// `fixed32` field.
    pub fn fixed32(&self, field: u32) -> Result<u32, ProtocolError> {
        match self.get(field) {
            None => Ok(0),
            Some(FieldValue::Fixed32(v)) => Ok(*v),
            Some(other) => Err(mismatch(field, WireType::Fixed32, other)),
        }
    }

    /// `fixed64` field.
    pub fn fixed64(&self, field: u32) -> Result<u64, ProtocolError> {
        match self.get(field) {
            None => Ok(0),
            Some(FieldValue::Fixed64(v)) => Ok(*v),
            Some(other) => Err(mismatch(field, WireType::Fixed64, other)),
        }
    }

    /// `float` field: the fixed32 bit pattern reinterpreted as IEEE-754.
    pub fn float(&self, field: u32) -> Result<f32, ProtocolError> {
        self.fixed32(field).map(f32::from_bits)
    }

    /// `double` field: the fixed64 bit pattern reinterpreted as IEEE-754.
    pub fn double(&self, field: u32) -> Result<f64, ProtocolError> {
        self.fixed64(field).map(f64::from_bits)
    }

    /// `bytes` field.
    pub fn bytes(&self, field: u32) -> Result<&[u8], ProtocolError> {
        match self.get(field) {
            None => Ok(&[]),
            Some(FieldValue::Bytes(b)) => Ok(b),
            Some(other) => {
                Err(mismatch(field, WireType::LengthDelimited, other))
            }
        }
    }

    /// `string` field. Invalid UTF-8 is replaced rather than rejected;
    /// device names and log lines are display text.
    pub fn string(&self, field: u32) -> Result<String, ProtocolError> {
        self.bytes(field)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// `repeated string` field.
    pub fn strings(&self, field: u32) -> Result<Vec<String>, ProtocolError> {
        self.get_all(field)
            .iter()
            .map(|value| match value {
                FieldValue::Bytes(b) => {
                    Ok(String::from_utf8_lossy(b).into_owned())
                }
                other => Err(mismatch(field, WireType::LengthDelimited, other)),
            })
            .collect()
    }

    /// `repeated uint32`/`repeated enum` field (unpacked).
    pub fn uints(&self, field: u32) -> Result<Vec<u64>, ProtocolError> {
        self.get_all(field)
            .iter()
            .map(|value| match value {
                FieldValue::Varint(v) => Ok(*v),
                other => Err(mismatch(field, WireType::Varint, other)),
            })
            .collect()
    }

    // -- Builder -----------------------------------------------------------

    /// Adds an unsigned varint; zero is omitted.
    pub fn with_uint(mut self, field: u32, value: u64) -> Self {
        if value != 0 {
            self.insert(field, FieldValue::Varint(value));
        }
        self
    }

    /// Adds an `int32`, sign-extended the way protobuf requires.
    pub fn with_int32(self, field: u32, value: i32) -> Self {
        self.with_uint(field, i64::from(value) as u64)
    }

    /// Adds a `bool`; `false` is omitted.
    pub fn with_bool(self, field: u32, value: bool) -> Self {
        self.with_uint(field, u64::from(value))
    }

    /// Adds a `fixed32`; zero is omitted.
    pub fn with_fixed32(mut self, field: u32, value: u32) -> Self {
        if value != 0 {
            self.insert(field, FieldValue::Fixed32(value));
        }
        self
    }

    /// Adds a `float` as its fixed32 bit pattern; `+0.0` is omitted.
    pub fn with_float(self, field: u32, value: f32) -> Self {
        self.with_fixed32(field, value.to_bits())
    }

    /// Adds a `string`; the empty string is omitted.
    pub fn with_string(mut self, field: u32, value: &str) -> Self {
        if !value.is_empty() {
            self.insert(field, FieldValue::Bytes(value.as_bytes().to_vec()));
        }
        self
    }

    /// Adds an optional value using the has-flag idiom: when `value` is
    /// `Some`, `has_field` is set to `true` and `put` writes the value
    /// under `value_field`. When it is `None`, neither field is written.
    ///
    /// ```rust
    /// use nodelink_protocol::TagMap;
    ///
    /// let map = TagMap::new().with_present(4, 5, Some(0.5f32), TagMap::with_float);
    /// assert_eq!(map.boolean(4).unwrap(), true);
    /// assert_eq!(map.float(5).unwrap(), 0.5);
    ///
    /// let map = TagMap::new().with_present(4, 5, None::<f32>, TagMap::with_float);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_present<T>(
        self,
        has_field: u32,
        value_field: u32,
        value: Option<T>,
        put: impl FnOnce(Self, u32, T) -> Self,
    ) -> Self {
        match value {
            Some(v) => put(self.with_bool(has_field, true), value_field, v),
            None => self,
        }
    }
}

fn mismatch(field: u32, expected: WireType, found: &FieldValue) -> ProtocolError {
    ProtocolError::FieldType {
        field,
        expected,
        found: found.wire_type(),
    }
}

/// Takes exactly `N` bytes off the front of `buf`.
fn take_array<const N: usize>(
    buf: &mut &[u8],
    field: u32,
) -> Result<[u8; N], ProtocolError> {
    let Some((head, rest)) = buf.split_first_chunk::<N>() else {
        return Err(ProtocolError::Truncated {
            field,
            needed: N,
            available: buf.len(),
        });
    };
    *buf = rest;
    Ok(*head)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // decode()
    // =====================================================================

    #[test]
    fn test_decode_varint_and_string_fields() {
        // field 1 varint 42, field 2 length-delimited "abc"
        let buf = [0x08, 0x2A, 0x12, 0x03, b'a', b'b', b'c'];

        let map = TagMap::decode(&buf).unwrap();

        assert_eq!(map.get(1), Some(&FieldValue::Varint(42)));
        assert_eq!(map.get(2), Some(&FieldValue::Bytes(b"abc".to_vec())));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_decode_empty_payload_is_empty_map() {
        assert!(TagMap::decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_fixed32_is_little_endian() {
        // field 2, wire type 5: 0x15
        let buf = [0x15, 0x78, 0x56, 0x34, 0x12];
        let map = TagMap::decode(&buf).unwrap();
        assert_eq!(map.fixed32(2).unwrap(), 0x1234_5678);
    }

    #[test]
    fn test_decode_fixed64_preserves_double_bits() {
        let mut buf = vec![0x19]; // field 3, wire type 1
        buf.extend_from_slice(&1.5f64.to_bits().to_le_bytes());
        let map = TagMap::decode(&buf).unwrap();
        assert_eq!(map.double(3).unwrap(), 1.5);
    }

    #[test]
    fn test_decode_unknown_wire_type_is_error() {
        // field 1, wire type 3 (start group)
        let result = TagMap::decode(&[0x0B, 0x00]);
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownWireType { field: 1, wire_type: 3 })
        ));
    }

    #[test]
    fn test_decode_short_fixed32_is_truncated_error() {
        let result = TagMap::decode(&[0x0D, 0x01, 0x02]);
        assert!(matches!(
            result,
            Err(ProtocolError::Truncated { field: 1, needed: 4, available: 2 })
        ));
    }

    #[test]
    fn test_decode_short_length_delimited_keeps_partial_bytes() {
        // declares 5 bytes, only 2 present
        let map = TagMap::decode(&[0x0A, 0x05, b'h', b'i']).unwrap();
        assert_eq!(map.bytes(1).unwrap(), b"hi");
    }

    #[test]
    fn test_decode_repeated_field_keeps_all_and_last_wins() {
        let buf = [0x0A, 0x01, b'a', 0x0A, 0x01, b'b'];
        let map = TagMap::decode(&buf).unwrap();
        assert_eq!(map.string(1).unwrap(), "b");
        assert_eq!(map.strings(1).unwrap(), vec!["a", "b"]);
    }

    // =====================================================================
    // accessors
    // =====================================================================

    #[test]
    fn test_accessors_absent_field_reads_default() {
        let map = TagMap::new();
        assert_eq!(map.uint(9).unwrap(), 0);
        assert!(!map.boolean(9).unwrap());
        assert_eq!(map.float(9).unwrap(), 0.0);
        assert_eq!(map.string(9).unwrap(), "");
        assert!(map.strings(9).unwrap().is_empty());
    }

    #[test]
    fn test_float_on_varint_field_fails_descriptively() {
        let mut map = TagMap::new();
        map.insert(3, FieldValue::Varint(1));

        let err = map.float(3).unwrap_err();

        assert!(matches!(
            err,
            ProtocolError::FieldType {
                field: 3,
                expected: WireType::Fixed32,
                found: WireType::Varint,
            }
        ));
        assert_eq!(err.to_string(), "field 3: expected fixed32, found varint");
    }

    #[test]
    fn test_int32_reads_sign_extended_negative() {
        let map = TagMap::new().with_int32(1, -5);
        assert_eq!(map.int32(1).unwrap(), -5);
        assert_eq!(map.encode().len(), 11, "tag + ten-byte varint");
    }

    // =====================================================================
    // builder / encode()
    // =====================================================================

    #[test]
    fn test_encode_matches_hand_built_bytes() {
        let map = TagMap::new().with_uint(1, 42).with_string(2, "abc");
        assert_eq!(
            map.encode(),
            vec![0x08, 0x2A, 0x12, 0x03, b'a', b'b', b'c']
        );
    }

    #[test]
    fn test_encode_omits_default_values() {
        let map = TagMap::new()
            .with_uint(1, 0)
            .with_bool(2, false)
            .with_string(3, "")
            .with_float(4, 0.0);
        assert!(map.is_empty());
        assert!(map.encode().is_empty());
    }

    #[test]
    fn test_encode_float_uses_fixed32_wire_type() {
        let bytes = TagMap::new().with_float(5, 1.0).encode();
        assert_eq!(bytes[0], (5 << 3) | 5);
        assert_eq!(&bytes[1..], &1.0f32.to_bits().to_le_bytes());
    }

    #[test]
    fn test_encoded_len_matches_encode() {
        let mut map = TagMap::new()
            .with_fixed32(1, 0xDEAD_BEEF)
            .with_uint(300, u64::MAX)
            .with_string(2, "hello");
        map.push(2, FieldValue::Bytes(vec![0; 200]));
        assert_eq!(map.encoded_len(), map.encode().len());
    }

    #[test]
    fn test_with_present_writes_flag_and_value_or_nothing() {
        let set = TagMap::new().with_present(2, 3, Some(true), TagMap::with_bool);
        assert!(set.boolean(2).unwrap());
        assert!(set.boolean(3).unwrap());

        let unset = TagMap::new().with_present(2, 3, None, TagMap::with_bool);
        assert!(!unset.contains(2));
        assert!(!unset.contains(3));
    }
}
