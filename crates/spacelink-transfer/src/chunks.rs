//! Byte-range bookkeeping for partially transferred files.
//!
//! Ranges are inclusive on both ends. A transaction's chunk map is kept
//! unordered while packets stream in and merged periodically.

use serde::Serialize;

/// Inclusive byte range `[chunk_start, chunk_end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FileProgress {
    pub chunk_start: u64,
    pub chunk_end: u64,
}

impl FileProgress {
    pub fn new(chunk_start: u64, chunk_end: u64) -> Self {
        Self {
            chunk_start,
            chunk_end,
        }
    }

    /// Range covering a whole file of `size` bytes. `size` must be non-zero.
    pub fn whole(size: u64) -> Self {
        Self::new(0, size.saturating_sub(1))
    }

    /// Number of bytes in the range.
    pub fn byte_count(&self) -> u64 {
        self.chunk_end - self.chunk_start + 1
    }

    fn contains(&self, other: &FileProgress) -> bool {
        self.chunk_start <= other.chunk_start && other.chunk_end <= self.chunk_end
    }

    fn touches(&self, other: &FileProgress) -> bool {
        other.chunk_start <= self.chunk_end.saturating_add(1)
            && self.chunk_start <= other.chunk_end.saturating_add(1)
    }
}

/// Sort and coalesce `chunks` in place, returning the covered byte count.
///
/// Inverted ranges are dropped. With a known `file_size`, ranges reaching
/// past the end of the file are dropped too. Adjacent ranges are joined.
pub fn merge_chunks_overlap(chunks: &mut Vec<FileProgress>, file_size: u64) -> u64 {
    chunks.retain(|c| c.chunk_start <= c.chunk_end && (file_size == 0 || c.chunk_end < file_size));
    chunks.sort_unstable();

    let mut merged: Vec<FileProgress> = Vec::with_capacity(chunks.len());
    for chunk in chunks.drain(..) {
        match merged.last_mut() {
            Some(last) if chunk.chunk_start <= last.chunk_end.saturating_add(1) => {
                last.chunk_end = last.chunk_end.max(chunk.chunk_end);
            }
            _ => merged.push(chunk),
        }
    }
    *chunks = merged;
    total_bytes(chunks)
}

/// Sum of range lengths. Only exact for merged maps.
pub fn total_bytes(chunks: &[FileProgress]) -> u64 {
    chunks.iter().map(FileProgress::byte_count).sum()
}

/// Gaps in a merged chunk map for a file of `file_size` bytes, including
/// a leading gap before the first range and a trailing gap after the last.
pub fn find_chunks_missing(chunks: &[FileProgress], file_size: u64) -> Vec<FileProgress> {
    let mut missing = Vec::new();
    if file_size == 0 {
        return missing;
    }
    let mut next = 0u64;
    for chunk in chunks {
        if chunk.chunk_start > next {
            missing.push(FileProgress::new(next, chunk.chunk_start - 1));
        }
        next = next.max(chunk.chunk_end + 1);
    }
    if next < file_size {
        missing.push(FileProgress::new(next, file_size - 1));
    }
    missing
}

/// Record `chunk` in an unmerged map.
///
/// Returns `false` when an existing range already covers it. A chunk that
/// touches an existing range extends that range instead of adding a new one.
pub fn add_chunk(chunks: &mut Vec<FileProgress>, chunk: FileProgress) -> bool {
    if chunk.chunk_start > chunk.chunk_end {
        return false;
    }
    if chunks.iter().any(|c| c.contains(&chunk)) {
        return false;
    }
    if let Some(existing) = chunks.iter_mut().find(|c| c.touches(&chunk)) {
        existing.chunk_start = existing.chunk_start.min(chunk.chunk_start);
        existing.chunk_end = existing.chunk_end.max(chunk.chunk_end);
        return true;
    }
    chunks.push(chunk);
    true
}

/// Remove up to `max_len` bytes from the front of the lowest range.
pub fn take_chunk(chunks: &mut Vec<FileProgress>, max_len: u64) -> Option<FileProgress> {
    if max_len == 0 {
        return None;
    }
    let index = chunks
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| c.chunk_start)
        .map(|(i, _)| i)?;
    let first = &mut chunks[index];
    let end = first.chunk_start.saturating_add(max_len - 1).min(first.chunk_end);
    let taken = FileProgress::new(first.chunk_start, end);
    if end == first.chunk_end {
        chunks.remove(index);
    } else {
        first.chunk_start = end + 1;
    }
    Some(taken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(start: u64, end: u64) -> FileProgress {
        FileProgress::new(start, end)
    }

    #[test]
    fn merge_sorts_and_coalesces() {
        let mut chunks = vec![fp(50, 59), fp(0, 9), fp(5, 20), fp(21, 30), fp(55, 70)];
        let total = merge_chunks_overlap(&mut chunks, 100);
        assert_eq!(chunks, vec![fp(0, 30), fp(50, 70)]);
        assert_eq!(total, 31 + 21);
    }

    #[test]
    fn merge_drops_out_of_range() {
        let mut chunks = vec![fp(0, 9), fp(95, 100), fp(20, 10)];
        assert_eq!(merge_chunks_overlap(&mut chunks, 100), 10);
        assert_eq!(chunks, vec![fp(0, 9)]);
    }

    #[test]
    fn merge_keeps_everything_when_size_unknown() {
        let mut chunks = vec![fp(1000, 1999), fp(0, 999)];
        assert_eq!(merge_chunks_overlap(&mut chunks, 0), 2000);
        assert_eq!(chunks, vec![fp(0, 1999)]);
    }

    #[test]
    fn missing_is_the_complement() {
        let mut chunks = vec![fp(30, 39), fp(10, 19), fp(15, 25)];
        let covered = merge_chunks_overlap(&mut chunks, 50);
        let missing = find_chunks_missing(&chunks, 50);
        assert_eq!(missing, vec![fp(0, 9), fp(26, 29), fp(40, 49)]);
        assert_eq!(covered + total_bytes(&missing), 50);
    }

    #[test]
    fn missing_for_empty_and_full_maps() {
        assert_eq!(find_chunks_missing(&[], 8), vec![fp(0, 7)]);
        assert!(find_chunks_missing(&[fp(0, 7)], 8).is_empty());
        assert!(find_chunks_missing(&[], 0).is_empty());
    }

    #[test]
    fn add_chunk_extends_neighbours() {
        let mut chunks = Vec::new();
        assert!(add_chunk(&mut chunks, fp(0, 9)));
        assert!(add_chunk(&mut chunks, fp(10, 19)));
        assert!(!add_chunk(&mut chunks, fp(5, 15)));
        assert!(add_chunk(&mut chunks, fp(40, 49)));
        assert_eq!(chunks, vec![fp(0, 19), fp(40, 49)]);
    }

    #[test]
    fn take_chunk_consumes_lowest_range() {
        let mut togo = vec![fp(500, 599), fp(0, 249)];
        assert_eq!(take_chunk(&mut togo, 200), Some(fp(0, 199)));
        assert_eq!(take_chunk(&mut togo, 200), Some(fp(200, 249)));
        assert_eq!(take_chunk(&mut togo, 200), Some(fp(500, 599)));
        assert_eq!(take_chunk(&mut togo, 200), None);
    }
}
