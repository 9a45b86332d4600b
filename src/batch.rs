// Batching: split an ordered slice into consecutive, size-bounded
// chunks. Pure and repeatable; borrowing keeps the records where the
// loader put them.

use std::fmt;
use std::str::FromStr;

/// Records per create call. Always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSize(usize);

impl BatchSize {
    /// 50 stays under the server's payload limits while keeping the
    /// number of round trips low.
    pub const DEFAULT: BatchSize = BatchSize(50);

    pub fn new(size: usize) -> Option<Self> {
        if size == 0 {
            None
        } else {
            Some(BatchSize(size))
        }
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for BatchSize {
    fn default() -> Self {
        BatchSize::DEFAULT
    }
}

impl fmt::Display for BatchSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: usize = s
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a whole number", s))?;
        BatchSize::new(n).ok_or_else(|| "batch size must be at least 1".to_string())
    }
}

/// Number of batches `len` items produce.
pub fn batch_count(len: usize, size: BatchSize) -> usize {
    len.div_ceil(size.get())
}

/// A non-empty run of consecutive items. `index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a, T> {
    pub index: usize,
    pub items: &'a [T],
}

impl<'a, T> Batch<'a, T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchPlan<'a, T> {
    items: &'a [T],
    size: BatchSize,
}

impl<'a, T> BatchPlan<'a, T> {
    pub fn new(items: &'a [T], size: BatchSize) -> Self {
        BatchPlan { items, size }
    }

    pub fn size(&self) -> BatchSize {
        self.size
    }

    /// Known before any batch is produced, for progress reporting.
    pub fn batch_count(&self) -> usize {
        batch_count(self.items.len(), self.size)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Batch<'a, T>> + 'a {
        self.items
            .chunks(self.size.get())
            .enumerate()
            .map(|(i, items)| Batch {
                index: i + 1,
                items,
            })
    }
}
