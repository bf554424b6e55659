//! Contiguous runs of programmed bytes

/// A contiguous run of bytes at a base address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
    /// Address of the first byte
    pub offset: u64,
    /// The bytes
    pub data: Vec<u8>,
}

impl MemoryChunk {
    /// Create a chunk at `offset`
    pub fn new(offset: u64, data: Vec<u8>) -> Self {
        Self { offset, data }
    }

    /// One past the last address covered
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Whether the two ranges overlap or touch
    ///
    /// Touching ranges count as intersecting so that sequential records
    /// coalesce into one chunk.
    pub fn intersects(&self, other: &MemoryChunk) -> bool {
        self.offset <= other.end() && other.offset <= self.end()
    }

    /// Grow this chunk to the union of both ranges
    ///
    /// Bytes from `other` overwrite this chunk's bytes where the ranges
    /// overlap. Any gap between non-touching ranges is zero-filled, but
    /// callers only combine intersecting chunks.
    pub fn combine(&mut self, other: &MemoryChunk) {
        let start = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        let mut data = vec![0u8; (end - start) as usize];

        let own = (self.offset - start) as usize;
        data[own..own + self.data.len()].copy_from_slice(&self.data);
        let theirs = (other.offset - start) as usize;
        data[theirs..theirs + other.data.len()].copy_from_slice(&other.data);

        self.offset = start;
        self.data = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersects_includes_touching() {
        let a = MemoryChunk::new(0, vec![0; 16]);
        assert!(a.intersects(&MemoryChunk::new(16, vec![1])));
        assert!(a.intersects(&MemoryChunk::new(8, vec![1; 4])));
        assert!(!a.intersects(&MemoryChunk::new(17, vec![1])));
        assert!(MemoryChunk::new(17, vec![1]).intersects(&MemoryChunk::new(10, vec![0; 7])));
    }

    #[test]
    fn test_combine_overlap_last_wins() {
        let mut a = MemoryChunk::new(0x10, vec![0xAA; 8]);
        let b = MemoryChunk::new(0x14, vec![0xBB; 8]);
        a.combine(&b);
        assert_eq!(a.offset, 0x10);
        assert_eq!(a.end(), 0x1C);
        assert_eq!(&a.data[..4], &[0xAA; 4]);
        assert_eq!(&a.data[4..], &[0xBB; 8]);
    }

    #[test]
    fn test_combine_new_data_before_and_inside() {
        let mut a = MemoryChunk::new(0x10, vec![1, 2, 3, 4]);
        a.combine(&MemoryChunk::new(0x0E, vec![9, 9, 9]));
        assert_eq!(a.offset, 0x0E);
        assert_eq!(a.data, vec![9, 9, 9, 2, 3, 4]);

        a.combine(&MemoryChunk::new(0x10, vec![7]));
        assert_eq!(a.offset, 0x0E);
        assert_eq!(a.data, vec![9, 9, 7, 2, 3, 4]);
    }

    #[test]
    fn test_combine_span_is_union() {
        for (ao, al, bo, bl) in [(0u64, 8usize, 4u64, 8usize), (4, 8, 0, 8), (0, 16, 4, 2), (4, 2, 0, 16)] {
            let a = MemoryChunk::new(ao, (0..al as u8).collect());
            let b = MemoryChunk::new(bo, vec![0xEE; bl]);
            let mut c = a.clone();
            c.combine(&b);
            assert_eq!(c.offset, ao.min(bo));
            assert_eq!(c.end(), a.end().max(b.end()));
            for addr in c.offset..c.end() {
                let got = c.data[(addr - c.offset) as usize];
                if addr >= b.offset && addr < b.end() {
                    assert_eq!(got, 0xEE);
                } else {
                    assert_eq!(got, a.data[(addr - a.offset) as usize]);
                }
            }
        }
    }
}
