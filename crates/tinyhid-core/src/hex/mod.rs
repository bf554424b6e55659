//! Intel HEX object files
//!
//! A [`HexImage`] is a sparse memory image: an ordered list of
//! non-overlapping [`MemoryChunk`]s. Parsing appends each data record to
//! the image, merging it into any chunk it overlaps or touches, with the
//! later record winning where addresses collide.
//!
//! Serialization always emits 16-byte data records with 16-bit addresses
//! and no extended address records, followed by `:00000001FF`.

mod chunk;
mod parser;
mod writer;

use std::fs;
use std::path::Path;

pub use chunk::MemoryChunk;
pub use parser::parse;
pub use writer::{serialize, END_OF_FILE_RECORD};

use crate::error::{Error, Result};

/// Sparse memory image built from HEX records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexImage {
    chunks: Vec<MemoryChunk>,
}

impl HexImage {
    /// Create an empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Image holding a single chunk, e.g. a flash dump starting at 0
    pub fn from_chunk(offset: u64, data: Vec<u8>) -> Self {
        let mut image = Self::new();
        image.append_data(offset, data);
        image
    }

    /// Parse an Intel HEX file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(parse(text.lines())?)
    }

    /// Write the image to disk as Intel HEX
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = String::new();
        for line in serialize(self)? {
            text.push_str(&line);
            text.push('\n');
        }
        fs::write(path, text)?;
        Ok(())
    }

    /// The chunks, in insertion order
    pub fn chunks(&self) -> &[MemoryChunk] {
        &self.chunks
    }

    /// Whether the image holds no data
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Lowest address covered by any chunk (0 for an empty image)
    pub fn offset(&self) -> u64 {
        self.chunks.iter().map(|c| c.offset).min().unwrap_or(0)
    }

    /// One past the highest address covered by any chunk (0 for an empty image)
    pub fn end(&self) -> u64 {
        self.chunks.iter().map(MemoryChunk::end).max().unwrap_or(0)
    }

    /// Add bytes at `offset`, merging with any intersecting chunk
    ///
    /// The last chunk is tried first since records usually arrive in
    /// ascending order; otherwise all chunks are scanned. New bytes win
    /// where they overlap existing ones.
    pub fn append_data(&mut self, offset: u64, data: Vec<u8>) {
        let candidate = MemoryChunk::new(offset, data);

        let target = match self.chunks.last() {
            Some(last) if last.intersects(&candidate) => Some(self.chunks.len() - 1),
            _ => self.chunks.iter().position(|c| c.intersects(&candidate)),
        };

        match target {
            Some(index) => {
                self.chunks[index].combine(&candidate);
                self.absorb_neighbours(index);
            }
            None => self.chunks.push(candidate),
        }
    }

    /// Merge chunks that a grown chunk now reaches into it
    ///
    /// The grown chunk holds the newest bytes on any overlap, so it is
    /// combined on top of the older chunk.
    fn absorb_neighbours(&mut self, mut index: usize) {
        while let Some(other) = (0..self.chunks.len())
            .find(|&j| j != index && self.chunks[j].intersects(&self.chunks[index]))
        {
            let grown = self.chunks.remove(index);
            let other = if other > index { other - 1 } else { other };
            self.chunks[other].combine(&grown);
            index = other;
        }
    }

    /// Copy every chunk into `buffer`, relative to the image base
    ///
    /// A chunk lands at `chunk.offset - self.offset() + dest_offset`.
    pub fn fill(&self, buffer: &mut [u8], dest_offset: usize) -> Result<()> {
        let base = self.offset();
        for chunk in &self.chunks {
            let pos = (chunk.offset - base) as usize + dest_offset;
            copy_chunk(buffer, pos, &chunk.data)?;
        }
        Ok(())
    }

    /// Copy every chunk into `buffer` at its absolute address
    pub fn fill_absolute(&self, buffer: &mut [u8]) -> Result<()> {
        for chunk in &self.chunks {
            copy_chunk(buffer, chunk.offset as usize, &chunk.data)?;
        }
        Ok(())
    }
}

fn copy_chunk(buffer: &mut [u8], pos: usize, data: &[u8]) -> Result<()> {
    let end = pos + data.len();
    if end > buffer.len() {
        return Err(Error::ImageTooLarge {
            needed: end,
            available: buffer.len(),
        });
    }
    buffer[pos..end].copy_from_slice(data);
    Ok(())
}
