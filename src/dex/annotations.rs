//! Annotation structures from the dex data section.
//!
//! Only the pieces needed to walk from a class definition to the annotations
//! on its methods are decoded:
//! - annotations_directory_item
//! - annotation_set_item
//! - annotation_item (wraps EncodedAnnotation)

use std::io::{Read, Seek};

use crate::dex::encoded_values::EncodedAnnotation;
use crate::error::DecodeResult;
use crate::stream::{ByteCursor, SequentialDecoder};

/// One entry of an annotations directory: a field, method or parameter index
/// paired with the offset of its annotation set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRef {
    pub index: u32,
    pub annotations_offset: u32,
}

impl AnnotationRef {
    pub fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<AnnotationRef> {
        let index = cursor.read_u32()?;
        let annotations_offset = cursor.read_u32()?;
        Ok(AnnotationRef { index, annotations_offset })
    }
}

/// annotations_directory_item
/// https://source.android.com/docs/core/runtime/dex-format#annotations-directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationsDirectory {
    pub class_annotations_offset: u32,
    pub field_annotations: Vec<AnnotationRef>,
    pub method_annotations: Vec<AnnotationRef>,
    pub parameter_annotations: Vec<AnnotationRef>,
}

impl AnnotationsDirectory {
    pub fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<AnnotationsDirectory> {
        let class_annotations_offset = cursor.read_u32()?;
        let field_count = cursor.read_u32()?;
        let method_count = cursor.read_u32()?;
        let parameter_count = cursor.read_u32()?;
        let field_annotations = SequentialDecoder::new(cursor, field_count, AnnotationRef::read)
            .collect::<DecodeResult<Vec<_>>>()?;
        let method_annotations = SequentialDecoder::new(cursor, method_count, AnnotationRef::read)
            .collect::<DecodeResult<Vec<_>>>()?;
        let parameter_annotations =
            SequentialDecoder::new(cursor, parameter_count, AnnotationRef::read)
                .collect::<DecodeResult<Vec<_>>>()?;
        Ok(AnnotationsDirectory {
            class_annotations_offset,
            field_annotations,
            method_annotations,
            parameter_annotations,
        })
    }
}

/// annotation_set_item, a counted list of annotation_item offsets
/// https://source.android.com/docs/core/runtime/dex-format#annotation-set-item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationSetItem {
    /// Offsets (from start of the file) to `annotation_item`s
    pub entries: Vec<u32>,
}

impl AnnotationSetItem {
    pub fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<AnnotationSetItem> {
        let size = cursor.read_u32()?;
        let mut entries = Vec::with_capacity(size as usize);
        for _ in 0..size {
            entries.push(cursor.read_u32()?);
        }
        Ok(AnnotationSetItem { entries })
    }
}

/// annotation_item
/// https://source.android.com/docs/core/runtime/dex-format#annotation-item
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationItem {
    /// Visibility: 0x00 = build, 0x01 = runtime, 0x02 = system
    pub visibility: u8,
    /// The encoded annotation payload
    pub annotation: EncodedAnnotation,
}

impl AnnotationItem {
    pub fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<AnnotationItem> {
        let visibility = cursor.read_u8()?;
        let annotation = EncodedAnnotation::read(cursor)?;
        Ok(AnnotationItem { visibility, annotation })
    }
}
