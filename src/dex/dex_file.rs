/* Dex file format structures and test discovery */

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use log::debug;

use crate::dex::annotations::{AnnotationItem, AnnotationSetItem, AnnotationsDirectory};
use crate::dex::{
    ENDIAN_CONSTANT, IGNORE_ANNOTATION, JUNIT3_BASE_DESCRIPTORS, MAGIC_DEX, MAGIC_VERSION,
    TEST_ANNOTATION,
};
use crate::error::DecodeResult;
use crate::fail;
use crate::stream::{ByteCursor, SequentialDecoder, Table};

/* Fixed strides of the header-described id tables */
const STRING_ID_STRIDE: u64 = 4;
const TYPE_ID_STRIDE: u64 = 4;
const PROTO_ID_STRIDE: u64 = 12;
const MEMBER_ID_STRIDE: u64 = 8;
const CLASS_DEF_STRIDE: u64 = 32;

/// The eight byte magic at the start of every dex file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexMagic {
    dex: [u8; 3],
    newline: u8,
    version: [u8; 3],
    zero: u8,
}

impl DexMagic {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<DexMagic> {
        let bytes = cursor.read_bytes(8)?;
        Ok(DexMagic {
            dex: [bytes[0], bytes[1], bytes[2]],
            newline: bytes[3],
            version: [bytes[4], bytes[5], bytes[6]],
            zero: bytes[7],
        })
    }

    fn is_valid(&self) -> bool {
        self.dex == MAGIC_DEX
            && self.newline == 0x0A
            && self.version == MAGIC_VERSION
            && self.zero == 0
    }
}

/// The 0x70 byte header at the start of a dex file. The seven trailing
/// size/offset pairs describe the id tables and the data section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexHeader {
    pub magic: DexMagic,
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_offset: u32,
    pub map_offset: u32,
    pub string_ids_size: u32,
    pub string_ids_offset: u32,
    pub type_ids_size: u32,
    pub type_ids_offset: u32,
    pub proto_ids_size: u32,
    pub proto_ids_offset: u32,
    pub field_ids_size: u32,
    pub field_ids_offset: u32,
    pub method_ids_size: u32,
    pub method_ids_offset: u32,
    pub class_defs_size: u32,
    pub class_defs_offset: u32,
    pub data_size: u32,
    pub data_offset: u32,
}

impl DexHeader {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<DexHeader> {
        let magic = DexMagic::read(cursor)?;
        let checksum = cursor.read_u32()?;
        let mut signature = [0u8; 20];
        for (i, b) in cursor.read_bytes(20)?.into_iter().enumerate() {
            signature[i] = b;
        }
        Ok(DexHeader {
            magic,
            checksum,
            signature,
            file_size: cursor.read_u32()?,
            header_size: cursor.read_u32()?,
            endian_tag: cursor.read_u32()?,
            link_size: cursor.read_u32()?,
            link_offset: cursor.read_u32()?,
            map_offset: cursor.read_u32()?,
            string_ids_size: cursor.read_u32()?,
            string_ids_offset: cursor.read_u32()?,
            type_ids_size: cursor.read_u32()?,
            type_ids_offset: cursor.read_u32()?,
            proto_ids_size: cursor.read_u32()?,
            proto_ids_offset: cursor.read_u32()?,
            field_ids_size: cursor.read_u32()?,
            field_ids_offset: cursor.read_u32()?,
            method_ids_size: cursor.read_u32()?,
            method_ids_offset: cursor.read_u32()?,
            class_defs_size: cursor.read_u32()?,
            class_defs_offset: cursor.read_u32()?,
            data_size: cursor.read_u32()?,
            data_offset: cursor.read_u32()?,
        })
    }

    fn validate(&self) -> DecodeResult<()> {
        if !self.magic.is_valid() {
            fail!("invalid magic in dex header");
        }
        if self.endian_tag != ENDIAN_CONSTANT {
            fail!("invalid endian tag {:#010x} in dex header", self.endian_tag);
        }
        Ok(())
    }
}

/* Id table records */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRef {
    pub data_offset: u32,
}

impl StringRef {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<StringRef> {
        Ok(StringRef { data_offset: cursor.read_u32()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub descriptor_index: u32,
}

impl TypeRef {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<TypeRef> {
        Ok(TypeRef { descriptor_index: cursor.read_u32()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoRef {
    pub shorty_index: u32,
    pub return_type_index: u32,
    pub parameters_offset: u32,
}

impl ProtoRef {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<ProtoRef> {
        Ok(ProtoRef {
            shorty_index: cursor.read_u32()?,
            return_type_index: cursor.read_u32()?,
            parameters_offset: cursor.read_u32()?,
        })
    }
}

/// A field_id or method_id record, they share the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub class_index: u16,
    pub type_index: u16,
    pub name_index: u32,
}

impl MemberRef {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<MemberRef> {
        Ok(MemberRef {
            class_index: cursor.read_u16()?,
            type_index: cursor.read_u16()?,
            name_index: cursor.read_u32()?,
        })
    }
}

/// class_def_item. Offsets of 0 mean absent; index fields use -1 for "none".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub class_index: i32,
    pub access_flags: u32,
    pub super_class_index: i32,
    pub interfaces_offset: i32,
    pub source_file_index: i32,
    pub annotations_offset: i32,
    pub class_data_offset: i32,
    pub static_values_offset: i32,
}

impl ClassDef {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<ClassDef> {
        let words = cursor.read_i32s(8)?;
        Ok(ClassDef {
            class_index: words[0],
            access_flags: words[1] as u32,
            super_class_index: words[2],
            interfaces_offset: words[3],
            source_file_index: words[4],
            annotations_offset: words[5],
            class_data_offset: words[6],
            static_values_offset: words[7],
        })
    }
}

/// encoded_field within class_data. `index_diff` is kept exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedField {
    pub index_diff: u32,
    pub access_flags: u32,
}

impl EncodedField {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<EncodedField> {
        Ok(EncodedField {
            index_diff: cursor.read_uleb128()?,
            access_flags: cursor.read_uleb128()?,
        })
    }
}

/// encoded_method within class_data. `index_diff` is kept exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMethod {
    pub index_diff: u32,
    pub access_flags: u32,
    pub code_offset: u32,
}

impl EncodedMethod {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<EncodedMethod> {
        Ok(EncodedMethod {
            index_diff: cursor.read_uleb128()?,
            access_flags: cursor.read_uleb128()?,
            code_offset: cursor.read_uleb128()?,
        })
    }
}

/// class_data_item: four leb-encoded counts followed by that many
/// variable-width field and method records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassData {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassData {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<ClassData> {
        let static_fields_size = cursor.read_uleb128()?;
        let instance_fields_size = cursor.read_uleb128()?;
        let direct_methods_size = cursor.read_uleb128()?;
        let virtual_methods_size = cursor.read_uleb128()?;
        let static_fields = SequentialDecoder::new(cursor, static_fields_size, EncodedField::read)
            .collect::<DecodeResult<Vec<_>>>()?;
        let instance_fields =
            SequentialDecoder::new(cursor, instance_fields_size, EncodedField::read)
                .collect::<DecodeResult<Vec<_>>>()?;
        let direct_methods =
            SequentialDecoder::new(cursor, direct_methods_size, EncodedMethod::read)
                .collect::<DecodeResult<Vec<_>>>()?;
        let virtual_methods =
            SequentialDecoder::new(cursor, virtual_methods_size, EncodedMethod::read)
                .collect::<DecodeResult<Vec<_>>>()?;
        Ok(ClassData { static_fields, instance_fields, direct_methods, virtual_methods })
    }
}

/// Decoder over a single dex file.
///
/// The six id tables named by the header are decoded lazily. Walking a class
/// only touches the string, method and annotation records it actually needs,
/// so probing a large dex for a handful of test classes stays cheap.
pub struct DexDecoder<R: Read + Seek> {
    cursor: ByteCursor<R>,
    header: DexHeader,
    strings: Table<R, StringRef>,
    types: Table<R, TypeRef>,
    protos: Table<R, ProtoRef>,
    fields: Table<R, MemberRef>,
    methods: Table<R, MemberRef>,
    class_defs: Table<R, ClassDef>,
}

impl DexDecoder<File> {
    /// Opens a dex file, reads its header and validates the magic and endian
    /// tag. No table record is decoded yet.
    pub fn open<P: AsRef<Path>>(path: P) -> DecodeResult<Self> {
        DexDecoder::new(ByteCursor::open(path.as_ref())?)
    }
}

impl DexDecoder<Cursor<Vec<u8>>> {
    /// Decodes dex data held in memory, typically pulled out of an apk.
    pub fn from_bytes(bytes: Vec<u8>) -> DecodeResult<Self> {
        DexDecoder::new(ByteCursor::from_bytes(bytes))
    }
}

impl<R: Read + Seek> DexDecoder<R> {
    pub fn new(mut cursor: ByteCursor<R>) -> DecodeResult<Self> {
        let header = DexHeader::read(&mut cursor)?;
        header.validate()?;
        debug!(
            "dex tables: {} strings, {} types, {} protos, {} fields, {} methods, {} class defs",
            header.string_ids_size,
            header.type_ids_size,
            header.proto_ids_size,
            header.field_ids_size,
            header.method_ids_size,
            header.class_defs_size
        );
        let strings = Table::new(
            header.string_ids_offset as u64,
            STRING_ID_STRIDE,
            header.string_ids_size,
            StringRef::read,
        );
        let types = Table::new(
            header.type_ids_offset as u64,
            TYPE_ID_STRIDE,
            header.type_ids_size,
            TypeRef::read,
        );
        let protos = Table::new(
            header.proto_ids_offset as u64,
            PROTO_ID_STRIDE,
            header.proto_ids_size,
            ProtoRef::read,
        );
        let fields = Table::new(
            header.field_ids_offset as u64,
            MEMBER_ID_STRIDE,
            header.field_ids_size,
            MemberRef::read,
        );
        let methods = Table::new(
            header.method_ids_offset as u64,
            MEMBER_ID_STRIDE,
            header.method_ids_size,
            MemberRef::read,
        );
        let class_defs = Table::new(
            header.class_defs_offset as u64,
            CLASS_DEF_STRIDE,
            header.class_defs_size,
            ClassDef::read,
        );
        Ok(DexDecoder { cursor, header, strings, types, protos, fields, methods, class_defs })
    }

    pub fn header(&self) -> &DexHeader {
        &self.header
    }

    /// Resolves a string table entry. String data is stored as a leb-encoded
    /// UTF-16 length followed by NUL-terminated bytes.
    pub fn string(&mut self, index: u32) -> DecodeResult<String> {
        let string_ref = self.strings.get(&mut self.cursor, index)?;
        let mut scope = self.cursor.scoped_at(string_ref.data_offset as u64)?;
        scope.read_uleb128()?; // utf-16 code unit count, not needed
        scope.read_string()
    }

    /// Resolves a type table entry to its JNI descriptor.
    pub fn type_descriptor(&mut self, index: u32) -> DecodeResult<String> {
        let type_ref = self.types.get(&mut self.cursor, index)?;
        self.string(type_ref.descriptor_index)
    }

    /// Resolves a method table entry to its simple name.
    pub fn method_name(&mut self, index: u32) -> DecodeResult<String> {
        let method_ref = self.methods.get(&mut self.cursor, index)?;
        self.string(method_ref.name_index)
    }

    /// Resolves a field table entry to its simple name.
    pub fn field_name(&mut self, index: u32) -> DecodeResult<String> {
        let field_ref = self.fields.get(&mut self.cursor, index)?;
        self.string(field_ref.name_index)
    }

    /// Resolves a proto table entry to its shorty descriptor.
    pub fn proto_shorty(&mut self, index: u32) -> DecodeResult<String> {
        let proto_ref = self.protos.get(&mut self.cursor, index)?;
        self.string(proto_ref.shorty_index)
    }

    /// Scans the class def table for classes whose direct superclass is one
    /// of `descriptors` or a class matched earlier in the same scan, so
    /// subclass chains are picked up as long as the table orders parents
    /// before children.
    pub fn find_classes_directly_inherited_from(
        &mut self,
        descriptors: &[&str],
    ) -> DecodeResult<Vec<(ClassDef, String)>> {
        let mut known: HashSet<String> = descriptors.iter().map(|d| d.to_string()).collect();
        let mut found = Vec::new();
        for index in 0..self.class_defs.count() {
            let class_def = self.class_defs.get(&mut self.cursor, index)?;
            if class_def.super_class_index < 0 {
                continue;
            }
            let super_descriptor = self.type_descriptor(class_def.super_class_index as u32)?;
            if !known.contains(&super_descriptor) {
                continue;
            }
            let descriptor = self.type_descriptor(class_def.class_index as u32)?;
            known.insert(descriptor.clone());
            found.push((class_def, descriptor));
        }
        Ok(found)
    }

    /// Names of the virtual methods declared by a class, in declaration
    /// order. Classes without class data have none.
    pub fn virtual_method_names(&mut self, class_def: &ClassDef) -> DecodeResult<Vec<String>> {
        if class_def.class_data_offset <= 0 {
            return Ok(Vec::new());
        }
        let class_data = {
            let mut scope = self.cursor.scoped_at(class_def.class_data_offset as u64)?;
            ClassData::read(&mut scope)?
        };
        let mut names = Vec::with_capacity(class_data.virtual_methods.len());
        for method in &class_data.virtual_methods {
            names.push(self.method_name(method.index_diff)?);
        }
        Ok(names)
    }

    /// JUnit 3 style discovery: subclasses of the framework test case
    /// classes, taking every virtual method whose name starts with "test".
    pub fn find_junit3_tests(&mut self, filters: &[String]) -> DecodeResult<Vec<String>> {
        let classes = self.find_classes_directly_inherited_from(JUNIT3_BASE_DESCRIPTORS.as_slice())?;
        let mut tests = Vec::new();
        for (class_def, descriptor) in classes {
            let dotted = descriptor_to_dotted(&descriptor);
            if !matches_filters(filters, &dotted) {
                continue;
            }
            for name in self.virtual_method_names(&class_def)? {
                if name.starts_with("test") {
                    tests.push(format!("{dotted}#{name}"));
                }
            }
        }
        Ok(tests)
    }

    /// JUnit 4 style discovery: methods annotated `@Test` and not `@Ignore`.
    pub fn find_junit4_tests(&mut self, filters: &[String]) -> DecodeResult<Vec<String>> {
        let mut tests = Vec::new();
        for index in 0..self.class_defs.count() {
            let class_def = self.class_defs.get(&mut self.cursor, index)?;
            if class_def.annotations_offset == 0 {
                continue;
            }
            let descriptor = self.type_descriptor(class_def.class_index as u32)?;
            let dotted = descriptor_to_dotted(&descriptor);
            if !matches_filters(filters, &dotted) {
                continue;
            }
            let directory = {
                let mut scope = self.cursor.scoped_at(class_def.annotations_offset as u64)?;
                AnnotationsDirectory::read(&mut scope)?
            };
            let annotated = self.methods_by_annotation(&directory)?;
            let ignored: HashSet<&String> = annotated
                .get(IGNORE_ANNOTATION)
                .map(|names| names.iter().collect())
                .unwrap_or_default();
            if let Some(names) = annotated.get(TEST_ANNOTATION) {
                for name in names {
                    if !ignored.contains(name) {
                        tests.push(format!("{dotted}#{name}"));
                    }
                }
            }
        }
        Ok(tests)
    }

    /// Both discovery passes over the same file, JUnit 3 results first.
    pub fn find_tests(&mut self, filters: &[String]) -> DecodeResult<Vec<String>> {
        let mut tests = self.find_junit3_tests(filters)?;
        tests.extend(self.find_junit4_tests(filters)?);
        Ok(tests)
    }

    /// Groups the directory's method names by the descriptor of each
    /// annotation applied to them.
    fn methods_by_annotation(
        &mut self,
        directory: &AnnotationsDirectory,
    ) -> DecodeResult<HashMap<String, Vec<String>>> {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for entry in &directory.method_annotations {
            if entry.annotations_offset == 0 {
                continue;
            }
            let set = {
                let mut scope = self.cursor.scoped_at(entry.annotations_offset as u64)?;
                AnnotationSetItem::read(&mut scope)?
            };
            let name = self.method_name(entry.index)?;
            for item_offset in set.entries {
                let item = {
                    let mut scope = self.cursor.scoped_at(item_offset as u64)?;
                    AnnotationItem::read(&mut scope)?
                };
                let descriptor = self.type_descriptor(item.annotation.type_index)?;
                grouped.entry(descriptor).or_default().push(name.clone());
            }
        }
        Ok(grouped)
    }
}

/// Reformats a JNI descriptor into the dotted form used by
/// `adb am instrument`, stripping the leading `L` and trailing `;`.
fn descriptor_to_dotted(descriptor: &str) -> String {
    let count = descriptor.chars().count();
    if count < 2 {
        return descriptor.to_string();
    }
    descriptor
        .chars()
        .skip(1)
        .take(count - 2)
        .map(|c| if c == '/' { '.' } else { c })
        .collect()
}

/// An empty filter list matches everything, otherwise any filter appearing
/// as a substring of the dotted class name is a match.
fn matches_filters(filters: &[String], dotted_name: &str) -> bool {
    filters.is_empty() || filters.iter().any(|f| dotted_name.contains(f.as_str()))
}
