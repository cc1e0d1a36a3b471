use std::fmt;
use std::sync::Arc;

/// Logical address of a fixed-size block inside a named file.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockId {
    filename: Arc<str>,
    number: u32,
}

impl BlockId {
    /// Creates a block address.
    pub fn new(filename: impl Into<Arc<str>>, number: u32) -> Self {
        Self {
            filename: filename.into(),
            number,
        }
    }

    /// File the block belongs to.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Zero-based block number within the file.
    pub fn number(&self) -> u32 {
        self.number
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.filename, self.number)
    }
}
