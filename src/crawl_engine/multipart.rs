//! Byte-range splitting and reassembly for large downloads

use std::collections::BTreeMap;

use super::url_store::ByteRange;

/// Which part of a split resource a download task covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PartSpec {
    pub index: usize,
    pub range: ByteRange,
}

/// Split `total` bytes into at most `parts` contiguous inclusive ranges
#[must_use]
pub fn split_ranges(total: u64, parts: usize) -> Vec<ByteRange> {
    if total == 0 {
        return Vec::new();
    }
    let parts = (parts.max(1) as u64).min(total);
    let chunk_size = total.div_ceil(parts);
    let mut ranges = Vec::with_capacity(parts as usize);
    let mut start = 0;
    while start < total {
        let end = (start + chunk_size - 1).min(total - 1);
        ranges.push(ByteRange::new(start, end));
        start = end + 1;
    }
    ranges
}

/// Number of parts for a resource of `total` bytes: at least `min_parts`, and
/// enough that no part exceeds `max_part_bytes`
#[must_use]
pub fn part_count(total: u64, max_part_bytes: u64, min_parts: usize) -> usize {
    let needed = total.div_ceil(max_part_bytes.max(1));
    usize::try_from(needed).unwrap_or(usize::MAX).max(min_parts).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartError {
    #[error("part {0} is not part of this job")]
    UnknownPart(usize),
    #[error("part {index} has {actual} bytes, expected {expected}")]
    LengthMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },
}

/// Parts of one split resource collected as they arrive, in any order
#[derive(Debug)]
pub struct MultipartJob {
    url: String,
    total_length: u64,
    expected: Vec<ByteRange>,
    parts: BTreeMap<usize, Vec<u8>>,
    delivered: bool,
}

impl MultipartJob {
    #[must_use]
    pub fn new(url: impl Into<String>, total_length: u64, expected: Vec<ByteRange>) -> Self {
        Self {
            url: url.into(),
            total_length,
            expected,
            parts: BTreeMap::new(),
            delivered: false,
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    #[must_use]
    pub fn part_specs(&self) -> Vec<PartSpec> {
        self.expected
            .iter()
            .enumerate()
            .map(|(index, range)| PartSpec {
                index,
                range: *range,
            })
            .collect()
    }

    /// Store one part's bytes. A repeated part replaces the earlier copy.
    ///
    /// # Errors
    ///
    /// Rejects unknown part indices and bodies whose length does not match the
    /// requested range.
    pub fn record_part(&mut self, index: usize, bytes: Vec<u8>) -> Result<(), PartError> {
        let range = self.expected.get(index).ok_or(PartError::UnknownPart(index))?;
        let actual = bytes.len() as u64;
        if actual != range.len() {
            return Err(PartError::LengthMismatch {
                index,
                expected: range.len(),
                actual,
            });
        }
        self.parts.insert(index, bytes);
        Ok(())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.expected.is_empty() && self.parts.len() == self.expected.len()
    }

    #[must_use]
    pub fn received(&self) -> usize {
        self.parts.len()
    }

    /// Concatenate the parts by starting offset. Returns `None` until complete
    /// and on every call after the first successful one.
    pub fn assemble(&mut self) -> Option<Vec<u8>> {
        if self.delivered || !self.is_complete() {
            return None;
        }
        let mut order: Vec<usize> = self.parts.keys().copied().collect();
        order.sort_by_key(|&index| self.expected[index].start);

        let capacity = usize::try_from(self.total_length).unwrap_or(0);
        let mut body = Vec::with_capacity(capacity);
        for index in order {
            if let Some(bytes) = self.parts.remove(&index) {
                body.extend_from_slice(&bytes);
            }
        }
        self.delivered = true;
        Some(body)
    }
}
