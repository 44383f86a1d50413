//! Decoder for the binary `AndroidManifest.xml` format found inside apks.
//!
//! The binary form is a chunked document: a string pool, a resource map and a
//! token stream of start/end element records whose names and attribute values
//! are indices into the pool. Decoding walks the token stream once, builds an
//! element tree and extracts the handful of manifest facts that matter for
//! driving instrumented test runs.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use log::warn;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use serde::Serialize;

use crate::error::{DecodeError, DecodeResult};
use crate::fail;
use crate::stream::ByteCursor;

const XML_CHUNK_TAG: u32 = 0x0008_0003;
const STRING_POOL_TAG: u32 = 0x001C_0001;
const RESOURCE_MAP_TAG: u32 = 0x0008_0180;

const TOKEN_START_NAMESPACE: u32 = 0x0010_0100;
const TOKEN_END_DOCUMENT: u32 = 0x0010_0101;
const TOKEN_START_TAG: u32 = 0x0010_0102;
const TOKEN_END_TAG: u32 = 0x0010_0103;

const WORD: i64 = 4;

/// The document prologue: outer chunk, string pool bookkeeping and the
/// resource map. Kept around for pool lookups while tokens are decoded.
struct AxmlHeader {
    string_offsets: Vec<u32>,
    /// Absolute offset of the first pool entry, recorded while reading.
    string_data_offset: u64,
}

impl AxmlHeader {
    fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<AxmlHeader> {
        let tag = cursor.read_u32()?;
        if tag != XML_CHUNK_TAG {
            fail!("bad chunk tag {:#010x} in binary xml", tag);
        }
        cursor.read_u32()?; // declared file size, unused
        if cursor.read_u32()? != STRING_POOL_TAG {
            fail!("missing string pool chunk in binary xml");
        }
        let pool_size = cursor.read_u32()?;
        let string_count = cursor.read_u32()?;
        let style_count = cursor.read_u32()?;
        cursor.read_u32()?; // flags, unused
        let declared_data_offset = cursor.read_u32()?;
        let style_data_offset = cursor.read_u32()?;
        let mut string_offsets = Vec::with_capacity(string_count as usize);
        for _ in 0..string_count {
            string_offsets.push(cursor.read_u32()?);
        }
        cursor.skip(style_count as i64 * WORD)?;
        let string_data_offset = cursor.tell()?;
        // The declared offsets are relative to the pool chunk; the distance
        // to the styles (or the chunk end) is the raw string data length.
        let data_end = if style_data_offset == 0 { pool_size } else { style_data_offset };
        cursor.skip(data_end as i64 - declared_data_offset as i64)?;
        if style_data_offset != 0 {
            cursor.skip((pool_size as i64 - style_data_offset as i64) * WORD)?;
        }
        if cursor.read_u32()? != RESOURCE_MAP_TAG {
            fail!("missing resource map chunk in binary xml");
        }
        let resource_chunk_size = cursor.read_u32()?;
        if resource_chunk_size % 4 != 0 {
            fail!("resource map chunk size {:#x} is not word aligned", resource_chunk_size);
        }
        cursor.skip(resource_chunk_size as i64 - 8)?;
        Ok(AxmlHeader { string_offsets, string_data_offset })
    }
}

/// A flat element token as it appears in the stream, before tree building.
struct RawTag {
    is_start: bool,
    namespace: String,
    name: String,
    attributes: Vec<XmlAttr>,
}

/// An attribute with its value already resolved: either a pool string or a
/// synthesised `resourceID 0x...` placeholder when only an id was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XmlAttr {
    pub namespace: String,
    pub name: String,
    pub value: Option<String>,
}

/// An element of the decoded manifest tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct XmlTag {
    pub namespace: String,
    pub name: String,
    pub attributes: Vec<XmlAttr>,
    pub children: Vec<XmlTag>,
}

impl XmlTag {
    fn from_raw(raw: RawTag) -> XmlTag {
        XmlTag {
            namespace: raw.namespace,
            name: raw.name,
            attributes: raw.attributes,
            children: Vec::new(),
        }
    }

    /// First attribute with the given local name, if it carries a value.
    pub fn attr(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .and_then(|attr| attr.value.clone())
    }

    pub fn find_child(&self, name: &str) -> Option<&XmlTag> {
        self.children.iter().find(|child| child.name == name)
    }
}

/// Content of the `<instrumentation/>` manifest tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instrumentation {
    pub runner: Option<String>,
    pub functional_test: bool,
    pub handle_profiling: bool,
    pub label: Option<String>,
    pub target_package: Option<String>,
}

/// Content of the `<uses-sdk/>` manifest tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsesSdk {
    pub min_sdk_version: u32,
    pub target_sdk_version: u32,
}

/// The decoded manifest: the full element tree plus the extracted facts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    root: Option<XmlTag>,
    package_name: Option<String>,
    instrumentation: Option<Instrumentation>,
    uses_sdk: Option<UsesSdk>,
    permissions: Vec<String>,
}

impl Manifest {
    fn from_root(root: Option<XmlTag>) -> DecodeResult<Manifest> {
        let mut package_name = None;
        let mut instrumentation = None;
        let mut uses_sdk = None;
        let mut permissions = Vec::new();
        match &root {
            Some(tag) if tag.name == "manifest" => {
                package_name = tag.attr("package");
                for child in &tag.children {
                    match child.name.as_str() {
                        "instrumentation" => {
                            instrumentation = Some(Instrumentation {
                                runner: child.attr("name"),
                                functional_test: child.attr("functionalTest").as_deref()
                                    == Some("true"),
                                handle_profiling: child.attr("handleProfiling").as_deref()
                                    == Some("true"),
                                label: child.attr("label"),
                                target_package: child.attr("targetPackage"),
                            });
                        }
                        "uses-sdk" => {
                            uses_sdk = Some(UsesSdk {
                                min_sdk_version: sdk_version(child, "minSdkVersion")?,
                                target_sdk_version: sdk_version(child, "targetSdkVersion")?,
                            });
                        }
                        "uses-permission" => match child.attr("name") {
                            Some(name) => permissions.push(name),
                            None => fail!("uses-permission tag without a name attribute"),
                        },
                        _ => {}
                    }
                }
            }
            _ => warn!("no manifest tag at root level found"),
        }
        Ok(Manifest { root, package_name, instrumentation, uses_sdk, permissions })
    }

    pub fn root(&self) -> Option<&XmlTag> {
        self.root.as_ref()
    }

    pub fn package_name(&self) -> Option<&str> {
        self.package_name.as_deref()
    }

    pub fn instrumentation(&self) -> Option<&Instrumentation> {
        self.instrumentation.as_ref()
    }

    pub fn uses_sdk(&self) -> Option<&UsesSdk> {
        self.uses_sdk.as_ref()
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    /// Renders the decoded tree back out as human-readable xml.
    pub fn xml(&self) -> DecodeResult<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_error)?;
        if let Some(root) = &self.root {
            write_tag(root, &mut writer)?;
        }
        String::from_utf8(writer.into_inner())
            .map_err(|e| DecodeError::Format(format!("xml output is not valid utf-8: {e}")))
    }
}

fn write_tag(tag: &XmlTag, writer: &mut Writer<Vec<u8>>) -> DecodeResult<()> {
    let mut start = BytesStart::new(tag.name.as_str());
    for attr in &tag.attributes {
        if let Some(value) = &attr.value {
            start.push_attribute((attr.name.as_str(), value.as_str()));
        }
    }
    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    for child in &tag.children {
        write_tag(child, writer)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(tag.name.as_str())))
        .map_err(xml_error)?;
    Ok(())
}

fn xml_error<E: std::fmt::Display>(e: E) -> DecodeError {
    DecodeError::Format(format!("xml write failed: {e}"))
}

/// `minSdkVersion` and friends arrive as `resourceID 0x...` placeholders; the
/// version number is the hex token after the space.
fn sdk_version(tag: &XmlTag, attribute: &str) -> DecodeResult<u32> {
    let value = match tag.attr(attribute) {
        Some(value) => value,
        None => fail!("uses-sdk tag without a {} attribute", attribute),
    };
    let token = match value.split(' ').nth(1) {
        Some(token) => token.to_string(),
        None => fail!("malformed {} value '{}'", attribute, value),
    };
    let digits = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")).unwrap_or(&token);
    u32::from_str_radix(digits, 16)
        .map_err(|_| DecodeError::Format(format!("malformed {attribute} value '{value}'")))
}

/// Streaming decoder over a binary manifest.
pub struct AxmlDecoder<R: Read + Seek> {
    cursor: ByteCursor<R>,
    header: AxmlHeader,
}

impl AxmlDecoder<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> DecodeResult<Self> {
        AxmlDecoder::new(ByteCursor::open(path.as_ref())?)
    }
}

impl AxmlDecoder<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> DecodeResult<Self> {
        AxmlDecoder::new(ByteCursor::from_bytes(bytes))
    }
}

impl<R: Read + Seek> AxmlDecoder<R> {
    pub fn new(mut cursor: ByteCursor<R>) -> DecodeResult<Self> {
        let header = AxmlHeader::read(&mut cursor)?;
        Ok(AxmlDecoder { cursor, header })
    }

    /// Decodes the whole token stream and extracts the manifest facts.
    pub fn decode(mut self) -> DecodeResult<Manifest> {
        let tags = self.read_tags()?;
        Manifest::from_root(build_tree(tags))
    }

    fn read_tags(&mut self) -> DecodeResult<Vec<RawTag>> {
        let mut tags = Vec::new();
        loop {
            let kind = self.cursor.read_u32()?;
            self.cursor.read_u32()?; // chunk size, unused
            self.cursor.read_u32()?; // source line number, unused
            self.cursor.read_u32()?; // reserved
            match kind {
                TOKEN_START_TAG | TOKEN_END_TAG => {
                    let tag = self.read_tag(kind == TOKEN_START_TAG)?;
                    tags.push(tag);
                }
                TOKEN_END_DOCUMENT => break,
                TOKEN_START_NAMESPACE => {
                    self.cursor.read_i32()?; // prefix string index
                    self.cursor.read_i32()?; // uri string index
                }
                other => fail!("invalid xml token kind {:#010x}", other),
            }
        }
        Ok(tags)
    }

    fn read_tag(&mut self, is_start: bool) -> DecodeResult<RawTag> {
        let ns_index = self.cursor.read_i32()?;
        let name_index = self.cursor.read_i32()?;
        let mut attributes = Vec::new();
        if is_start {
            self.cursor.read_i32()?; // reserved
            let attr_count = self.cursor.read_i32()?;
            self.cursor.read_i32()?; // reserved
            for _ in 0..attr_count {
                attributes.push(self.read_attribute()?);
            }
        }
        let namespace = self.optional_string(ns_index)?.unwrap_or_default();
        let name = self.optional_string(name_index)?.unwrap_or_default();
        Ok(RawTag { is_start, namespace, name, attributes })
    }

    fn read_attribute(&mut self) -> DecodeResult<XmlAttr> {
        let ns_index = self.cursor.read_i32()?;
        let name_index = self.cursor.read_i32()?;
        let value_index = self.cursor.read_i32()?;
        self.cursor.read_i32()?; // flags, unused
        let resource_id = self.cursor.read_i32()?;
        let namespace = self.optional_string(ns_index)?.unwrap_or_default();
        let name = self.optional_string(name_index)?.unwrap_or_default();
        let mut value = self.optional_string(value_index)?;
        if value.is_none() && resource_id >= 0 {
            value = Some(format!("resourceID {:#x}", resource_id));
        }
        Ok(XmlAttr { namespace, name, value })
    }

    /// Pool lookup: negative indices carry no string, indices past the pool
    /// resolve to the empty string.
    fn optional_string(&mut self, index: i32) -> DecodeResult<Option<String>> {
        if index < 0 {
            return Ok(None);
        }
        let index = index as usize;
        if index >= self.header.string_offsets.len() {
            return Ok(Some(String::new()));
        }
        let offset = self.header.string_data_offset + self.header.string_offsets[index] as u64;
        let mut scope = self.cursor.scoped_at(offset)?;
        read_pool_entry(&mut scope).map(Some)
    }
}

/// Decodes a single string pool entry. Newer encoders store a UTF-8 entry
/// with the length duplicated into both bytes of the leading half-word;
/// otherwise the length counts UTF-16 code units.
fn read_pool_entry<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> DecodeResult<String> {
    let length = cursor.read_i16()?;
    if length < 0 {
        fail!("negative string pool entry length {}", length);
    }
    if length / 256 == length % 256 {
        let bytes = cursor.read_bytes((length % 256) as usize)?;
        String::from_utf8(bytes)
            .map_err(|e| DecodeError::Format(format!("invalid utf-8 string pool entry: {e}")))
    } else {
        let bytes = cursor.read_bytes(length as usize * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|e| DecodeError::Format(format!("invalid utf-16 string pool entry: {e}")))
    }
}

/// Folds the flat token list into a tree. The first token becomes the root;
/// tokens after the root's end tag are ignored, and unclosed elements are
/// attached to their parents as-is.
fn build_tree(raw_tags: Vec<RawTag>) -> Option<XmlTag> {
    let mut iter = raw_tags.into_iter();
    let mut stack = vec![XmlTag::from_raw(iter.next()?)];
    for raw in iter {
        if raw.is_start {
            stack.push(XmlTag::from_raw(raw));
        } else if stack.len() == 1 {
            break;
        } else if let Some(done) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(done);
            }
        }
    }
    while stack.len() > 1 {
        if let Some(done) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                parent.children.push(done);
            }
        }
    }
    stack.pop()
}
