use std::io::{Read, Seek};

use crate::error::{DecodeError, DecodeResult};
use crate::stream::{ByteCursor, SequentialDecoder};

/* Value type tags, low five bits of the leading byte */
pub const VALUE_BYTE: u8 = 0x00;
pub const VALUE_SHORT: u8 = 0x02;
pub const VALUE_CHAR: u8 = 0x03;
pub const VALUE_INT: u8 = 0x04;
pub const VALUE_LONG: u8 = 0x06;
pub const VALUE_FLOAT: u8 = 0x10;
pub const VALUE_DOUBLE: u8 = 0x11;
pub const VALUE_STRING: u8 = 0x17;
pub const VALUE_TYPE: u8 = 0x18;
pub const VALUE_FIELD: u8 = 0x19;
pub const VALUE_METHOD: u8 = 0x1A;
pub const VALUE_ENUM: u8 = 0x1B;
pub const VALUE_ARRAY: u8 = 0x1C;
pub const VALUE_ANNOTATION: u8 = 0x1D;
pub const VALUE_NULL: u8 = 0x1E;
pub const VALUE_BOOLEAN: u8 = 0x1F;

#[derive(Debug, PartialEq, Clone)]
pub struct EncodedAnnotation {
    pub type_index: u32,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    pub fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<EncodedAnnotation> {
        let type_index = cursor.read_uleb128()?;
        let size = cursor.read_uleb128()?;
        let elements = SequentialDecoder::new(cursor, size, AnnotationElement::read)
            .collect::<DecodeResult<Vec<_>>>()?;
        Ok(EncodedAnnotation { type_index, elements })
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct AnnotationElement {
    pub name_index: u32,
    pub value: EncodedValue,
}

impl AnnotationElement {
    pub fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<AnnotationElement> {
        let name_index = cursor.read_uleb128()?;
        let value = EncodedValue::read(cursor)?;
        Ok(AnnotationElement { name_index, value })
    }
}

/// A constant embedded in the dex data section.
///
/// Fixed-width kinds are only decoded when the declared payload width matches
/// the natural width of the type; any other declared width is preserved
/// undecoded as [`EncodedValue::Raw`]. Type, field and method references are
/// always kept raw, nothing downstream resolves them.
#[derive(Debug, PartialEq, Clone)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Enum(u64),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
    Raw(Vec<u8>),
}

impl EncodedValue {
    pub fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<EncodedValue> {
        let header = cursor.read_u8()?;
        let value_arg = header >> 5;
        let value_type = header & 0x1F;
        let size = value_arg as usize + 1;
        match value_type {
            VALUE_BYTE if size == 1 => Ok(EncodedValue::Byte(cursor.read_i8()?)),
            VALUE_SHORT if size == 2 => Ok(EncodedValue::Short(cursor.read_i16()?)),
            VALUE_CHAR if size == 1 => Ok(EncodedValue::Char(cursor.read_u8()? as char)),
            VALUE_INT if size == 4 => Ok(EncodedValue::Int(cursor.read_i32()?)),
            VALUE_LONG if size == 8 => Ok(EncodedValue::Long(cursor.read_i64()?)),
            VALUE_FLOAT if size == 4 => Ok(EncodedValue::Float(cursor.read_f32()?)),
            VALUE_DOUBLE if size == 8 => Ok(EncodedValue::Double(cursor.read_f64()?)),
            VALUE_ENUM => {
                let mut value: u64 = 0;
                for (index, byte) in cursor.read_bytes(size)?.into_iter().enumerate() {
                    value |= (byte as u64) << (index * 8);
                }
                Ok(EncodedValue::Enum(value))
            }
            VALUE_STRING => Ok(EncodedValue::Str(cursor.read_fixed_string(size)?)),
            VALUE_ARRAY => {
                let count = cursor.read_uleb128()?;
                let values = SequentialDecoder::new(cursor, count, EncodedValue::read)
                    .collect::<DecodeResult<Vec<_>>>()?;
                Ok(EncodedValue::Array(values))
            }
            VALUE_ANNOTATION => Ok(EncodedValue::Annotation(EncodedAnnotation::read(cursor)?)),
            VALUE_NULL => Ok(EncodedValue::Null),
            VALUE_BOOLEAN => Ok(EncodedValue::Boolean(value_arg != 0)),
            VALUE_BYTE | VALUE_SHORT | VALUE_CHAR | VALUE_INT | VALUE_LONG | VALUE_FLOAT
            | VALUE_DOUBLE | VALUE_TYPE | VALUE_FIELD | VALUE_METHOD => {
                Ok(EncodedValue::Raw(cursor.read_bytes(size)?))
            }
            _ => Err(DecodeError::Format(format!(
                "unknown encoded value type {:#04x}",
                value_type
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: Vec<u8>) -> DecodeResult<EncodedValue> {
        let mut cursor = ByteCursor::from_bytes(bytes);
        EncodedValue::read(&mut cursor)
    }

    #[test]
    fn decodes_fixed_width_values() {
        assert_eq!(decode(vec![0x00, 0x0A]).unwrap(), EncodedValue::Byte(10));
        assert_eq!(
            decode(vec![0x22, 0xEF, 0xBE]).unwrap(),
            EncodedValue::Short(-0x4111)
        );
        assert_eq!(
            decode(vec![0x64, 0xDE, 0xAD, 0xBE, 0xEF]).unwrap(),
            EncodedValue::Int(-272716322)
        );
        assert_eq!(
            decode(vec![0xE6, 1, 0, 0, 0, 0, 0, 0, 0x80]).unwrap(),
            EncodedValue::Long(i64::MIN + 1)
        );
    }

    #[test]
    fn decodes_string_and_markers() {
        assert_eq!(
            decode(vec![0x57, b'A', b'B', b'C']).unwrap(),
            EncodedValue::Str("ABC".to_string())
        );
        assert_eq!(decode(vec![0x1E]).unwrap(), EncodedValue::Null);
        assert_eq!(decode(vec![0x3F]).unwrap(), EncodedValue::Boolean(true));
        assert_eq!(decode(vec![0x1F]).unwrap(), EncodedValue::Boolean(false));
    }

    #[test]
    fn enum_accumulates_little_endian() {
        assert_eq!(
            decode(vec![0x3B, 0x01, 0x02]).unwrap(),
            EncodedValue::Enum(0x0201)
        );
    }

    #[test]
    fn mismatched_width_falls_back_to_raw() {
        // Byte with a declared two-byte payload is not a valid Byte.
        assert_eq!(
            decode(vec![0x20, 0x01, 0x02]).unwrap(),
            EncodedValue::Raw(vec![0x01, 0x02])
        );
        // Method references stay raw regardless of width.
        assert_eq!(
            decode(vec![0x1A, 0x09]).unwrap(),
            EncodedValue::Raw(vec![0x09])
        );
    }

    #[test]
    fn nested_array() {
        let value = decode(vec![0x1C, 0x02, 0x00, 0x07, 0x1E]).unwrap();
        assert_eq!(
            value,
            EncodedValue::Array(vec![EncodedValue::Byte(7), EncodedValue::Null])
        );
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert!(matches!(decode(vec![0x05]), Err(DecodeError::Format(_))));
    }

    #[test]
    fn annotation_with_elements() {
        // type_idx 3, one element: name_idx 1, boolean true
        let value = decode(vec![0x1D, 0x03, 0x01, 0x01, 0x3F]).unwrap();
        let expected = EncodedValue::Annotation(EncodedAnnotation {
            type_index: 3,
            elements: vec![AnnotationElement {
                name_index: 1,
                value: EncodedValue::Boolean(true),
            }],
        });
        assert_eq!(value, expected);
    }
}
