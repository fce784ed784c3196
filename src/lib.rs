//! An educational stack processor: a tiny assembly language is assembled into a
//! flat image of 16-bit cells and executed by a dual-stack interpreter.

pub mod machine;
pub mod memory;
pub mod processor;
pub mod stack;

pub use machine::{Config, Machine};
pub use memory::{Memory, Word};
pub use processor::{Instruction, Processor};
