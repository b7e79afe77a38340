//! Splitting byte ranges of an inode into per-block spans.

/// Part of a read served by one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Index into the inode's block list.
    pub index: usize,
    /// Offset inside the block.
    pub intra_offset: u32,
    pub len: u32,
}

/// Spans covering `len` bytes at `offset` of a `size`-byte inode, clamped
/// to end of file. Empty when `offset >= size`.
pub fn plan_read(size: u64, block_size: u32, offset: u64, len: u64) -> Vec<Span> {
    if offset >= size || len == 0 || block_size == 0 {
        return Vec::new();
    }
    let end = offset.saturating_add(len).min(size);
    let bs = block_size as u64;
    let mut spans = Vec::with_capacity(((end - offset) / bs + 2) as usize);
    let mut pos = offset;
    while pos < end {
        let index = pos / bs;
        let intra = pos % bs;
        let take = (bs - intra).min(end - pos);
        spans.push(Span {
            index: index as usize,
            intra_offset: intra as u32,
            len: take as u32,
        });
        pos += take;
    }
    spans
}
