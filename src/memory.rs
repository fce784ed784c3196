use std::fmt;

use crate::processor::Instruction;
use log::*;

pub mod parse;

pub type Byte = u8; // 1 byte
pub type Word = u16; // 2 bytes, one memory cell

/// Emulates the program memory. Code and data share the same cells; a cell is
/// only interpreted as an instruction when [`Instruction::decode`] says so.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Memory {
    /// The actual data of the memory
    pub data: Vec<Word>,
}

impl Memory {
    /// Initializes a zeroed memory of `size` cells
    pub fn new(size: usize) -> Self {
        Memory {
            data: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads a cell from the memory. Addresses outside the memory read as zero.
    pub fn read_word(&self, position: Word) -> Word {
        self.data.get(usize::from(position)).copied().unwrap_or(0)
    }

    /// Writes a cell to the memory. Writes outside the memory are dropped.
    pub fn write_word(&mut self, position: Word, value: Word) {
        if let Some(cell) = self.data.get_mut(usize::from(position)) {
            *cell = value;
        }
    }

    /// Writes an array of cells to the memory, dropping whatever does not fit
    pub fn write_array(&mut self, position: Word, data: &[Word]) {
        for (offset, value) in data.iter().enumerate() {
            let position = usize::from(position) + offset;
            if let Some(cell) = self.data.get_mut(position) {
                *cell = *value;
            }
        }
    }

    /// Classifies the cell at `position`
    pub fn cell(&self, position: Word) -> Cell {
        Cell::from(self.read_word(position))
    }

    /// Renders every cell the way a memory view lists it, e.g. `x00: LIT` or
    /// `x01: x05 (5)`.
    pub fn listing(&self) -> Vec<String> {
        (0..self.data.len())
            .map(|i| format!("x{:02X}: {}", i, Cell::from(self.data[i])))
            .collect()
    }

    /// Logs the listing of the whole memory
    pub fn dump(&self) {
        for line in self.listing() {
            info!("{}", line);
        }
    }

    /// Walks the first `len` cells as a program: each instruction is rendered as
    /// its mnemonic and its operand slot, if any, as a signed decimal. Cells that
    /// are not instructions are rendered as signed decimals too.
    pub fn disassemble(&self, len: usize) -> Vec<String> {
        let len = len.min(self.data.len());
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < len {
            let cell = self.data[i];
            match Instruction::decode(cell) {
                Some(instruction) => {
                    tokens.push(instruction.mnemonic().to_string());
                    for operand in 1..usize::from(instruction.width()) {
                        if i + operand < len {
                            tokens.push((self.data[i + operand] as i16).to_string());
                        }
                    }
                    i += usize::from(instruction.width()).max(1);
                }
                None => {
                    tokens.push((cell as i16).to_string());
                    i += 1;
                }
            }
        }

        tokens
    }
}

/// A memory cell as seen by a memory view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Instruction(Instruction),
    Data(Word),
}

impl From<Word> for Cell {
    fn from(value: Word) -> Self {
        match Instruction::decode(value) {
            Some(instruction) => Cell::Instruction(instruction),
            None => Cell::Data(value),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Instruction(instruction) => f.write_str(instruction.mnemonic()),
            // Data is shown by its unsigned low byte
            Cell::Data(value) => write!(f, "x{:02X} ({})", *value as Byte, *value as Byte),
        }
    }
}

/// Writes a block of instructions directly into the memory
#[macro_export]
macro_rules! write_instructions {
    ( $mem:ident : $pos:expr => $( $word:expr ),+ ) => {
        $mem.write_array($pos, &[
            $(
                $word as $crate::memory::Word,
            )+
        ]);
    };
}
