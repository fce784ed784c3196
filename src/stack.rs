use std::error;
use std::fmt;

use crate::memory::Word;

/// Maximum number of cells a stack can hold
pub const MAX_DEPTH: usize = 0xFF;

/// Raised when popping an empty stack or pushing onto a full one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFault;

impl fmt::Display for StackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stack overflow/underflow")
    }
}

impl error::Error for StackFault {}

/// A bounded stack of cells. The last element is the top.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Stack {
    data: Vec<Word>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `value` unless the stack already holds [`MAX_DEPTH`] cells
    pub fn push(&mut self, value: Word) -> Result<(), StackFault> {
        if self.data.len() >= MAX_DEPTH {
            return Err(StackFault);
        }
        self.data.push(value);
        Ok(())
    }

    /// Removes and returns the top cell
    pub fn pop(&mut self) -> Result<Word, StackFault> {
        self.data.pop().ok_or(StackFault)
    }

    /// Returns the top cell without removing it
    pub fn peek(&self) -> Result<Word, StackFault> {
        self.data.last().copied().ok_or(StackFault)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Contents from bottom to top
    pub fn as_slice(&self) -> &[Word] {
        &self.data
    }
}
