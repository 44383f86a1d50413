//! Cursor and table primitives shared by the dex and binary xml decoders.
//!
//! Everything here works against a seekable byte source so that multi-gigabyte
//! dex files can be probed without loading them into memory. Decoding is lazy:
//! a [`Table`] only visits the records it is asked for and remembers them, and
//! a [`SequentialDecoder`] walks counted variable-width records in place.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::error::{DecodeError, DecodeResult};
use crate::fail;

/// Chunk size used when scanning for the NUL terminator of an in-place string.
const STRING_CHUNK: usize = 128;

/// A little-endian reader over any seekable byte source.
pub struct ByteCursor<R: Read + Seek> {
    source: R,
    size: u64,
}

impl ByteCursor<File> {
    /// Opens a file and positions the cursor at its first byte.
    pub fn open(path: &Path) -> DecodeResult<Self> {
        ByteCursor::new(File::open(path)?)
    }
}

impl ByteCursor<Cursor<Vec<u8>>> {
    /// Wraps an in-memory buffer, mainly useful for dex data pulled out of an archive.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        ByteCursor { source: Cursor::new(bytes), size }
    }
}

impl<R: Read + Seek> ByteCursor<R> {
    pub fn new(mut source: R) -> DecodeResult<Self> {
        let size = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        Ok(ByteCursor { source, size })
    }

    /// Total size of the underlying source in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tell(&mut self) -> DecodeResult<u64> {
        Ok(self.source.stream_position()?)
    }

    pub fn seek(&mut self, offset: u64) -> DecodeResult<()> {
        self.source.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn skip(&mut self, delta: i64) -> DecodeResult<()> {
        self.source.seek(SeekFrom::Current(delta))?;
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8]) -> DecodeResult<()> {
        self.source.read_exact(buf)?;
        Ok(())
    }

    /// Reads as many bytes as the source can still provide, up to `buf.len()`.
    fn fill_at_most(&mut self, buf: &mut [u8]) -> DecodeResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.source.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_i8(&mut self) -> DecodeResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> DecodeResult<u16> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_i16(&mut self) -> DecodeResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> DecodeResult<i64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_f32(&mut self) -> DecodeResult<f32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> DecodeResult<f64> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub fn read_i32s(&mut self, count: usize) -> DecodeResult<Vec<i32>> {
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_i32()?);
        }
        Ok(values)
    }

    pub fn read_bytes(&mut self, count: usize) -> DecodeResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Reads an unsigned LEB128 value. Dex values fit in 32 bits, so any
    /// encoding still continuing after five bytes is rejected.
    pub fn read_uleb128(&mut self) -> DecodeResult<u32> {
        let mut value: u32 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_u8()?;
            let low = (byte & 0x7F) as u32;
            if shift < 32 {
                value |= low.wrapping_shl(shift);
            }
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 35 {
                fail!("uleb128 encoding exceeds five bytes");
            }
        }
        Ok(value)
    }

    /// Reads a NUL-terminated string, treating each byte as a Latin-1 code
    /// point. The cursor is left on the terminator (or at end of source when
    /// no terminator was found).
    pub fn read_string(&mut self) -> DecodeResult<String> {
        let start = self.tell()?;
        let mut text = String::new();
        let mut consumed: u64 = 0;
        loop {
            let mut buf = [0u8; STRING_CHUNK];
            let filled = self.fill_at_most(&mut buf)?;
            if filled == 0 {
                break;
            }
            let chunk = &buf[..filled];
            let upto = chunk.iter().position(|&b| b == 0).unwrap_or(filled);
            for &b in &chunk[..upto] {
                text.push(b as char);
            }
            consumed += upto as u64;
            if filled < STRING_CHUNK || upto < filled {
                break;
            }
        }
        self.seek(start + consumed)?;
        Ok(text)
    }

    /// Reads exactly `count` bytes as a Latin-1 string.
    pub fn read_fixed_string(&mut self, count: usize) -> DecodeResult<String> {
        let bytes = self.read_bytes(count)?;
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    /// Detour that restores the current position when dropped.
    pub fn scoped(&mut self) -> DecodeResult<ScopedPosition<'_, R>> {
        let restore_to = self.tell()?;
        Ok(ScopedPosition { cursor: self, restore_to })
    }

    /// Detour that seeks to `offset` first and restores the current position
    /// when dropped, whether or not the reads inside succeeded.
    pub fn scoped_at(&mut self, offset: u64) -> DecodeResult<ScopedPosition<'_, R>> {
        let restore_to = self.tell()?;
        self.seek(offset)?;
        Ok(ScopedPosition { cursor: self, restore_to })
    }
}

/// Guard returned by [`ByteCursor::scoped`] and [`ByteCursor::scoped_at`].
pub struct ScopedPosition<'a, R: Read + Seek> {
    cursor: &'a mut ByteCursor<R>,
    restore_to: u64,
}

impl<'a, R: Read + Seek> Deref for ScopedPosition<'a, R> {
    type Target = ByteCursor<R>;

    fn deref(&self) -> &Self::Target {
        self.cursor
    }
}

impl<'a, R: Read + Seek> DerefMut for ScopedPosition<'a, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.cursor
    }
}

impl<'a, R: Read + Seek> Drop for ScopedPosition<'a, R> {
    fn drop(&mut self) {
        // A failed restore cannot be reported from drop; subsequent reads
        // will surface the underlying I/O problem anyway.
        let _ = self.cursor.seek(self.restore_to);
    }
}

/// A lazily decoded table of fixed-stride records.
///
/// Records are decoded on first access and cached, so repeated lookups of the
/// same index are deterministic and touch the source only once.
pub struct Table<R: Read + Seek, T: Clone> {
    base: u64,
    stride: u64,
    count: u32,
    decode: fn(&mut ByteCursor<R>) -> DecodeResult<T>,
    cache: RefCell<HashMap<u32, T>>,
}

impl<R: Read + Seek, T: Clone> Table<R, T> {
    pub fn new(base: u64, stride: u64, count: u32, decode: fn(&mut ByteCursor<R>) -> DecodeResult<T>) -> Self {
        Table { base, stride, count, decode, cache: RefCell::new(HashMap::new()) }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn get(&self, cursor: &mut ByteCursor<R>, index: u32) -> DecodeResult<T> {
        if index >= self.count {
            return Err(DecodeError::Index { index, count: self.count });
        }
        if let Some(hit) = self.cache.borrow().get(&index).cloned() {
            return Ok(hit);
        }
        let mut scope = cursor.scoped_at(self.base + index as u64 * self.stride)?;
        let value = (self.decode)(&mut scope)?;
        drop(scope);
        self.cache.borrow_mut().insert(index, value.clone());
        Ok(value)
    }
}

/// Iterator over a counted run of variable-width records at the cursor's
/// current position. Yields exactly `count` decodes, then `None`.
pub struct SequentialDecoder<'a, R: Read + Seek, T> {
    cursor: &'a mut ByteCursor<R>,
    remaining: u32,
    decode: fn(&mut ByteCursor<R>) -> DecodeResult<T>,
}

impl<'a, R: Read + Seek, T> SequentialDecoder<'a, R, T> {
    pub fn new(cursor: &'a mut ByteCursor<R>, count: u32, decode: fn(&mut ByteCursor<R>) -> DecodeResult<T>) -> Self {
        SequentialDecoder { cursor, remaining: count, decode }
    }
}

impl<'a, R: Read + Seek, T> Iterator for SequentialDecoder<'a, R, T> {
    type Item = DecodeResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some((self.decode)(self.cursor))
    }
}
