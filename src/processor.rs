use std::convert::TryFrom;
use std::error;
use std::fmt;

use crate::memory::{Byte, Memory, Word};
use crate::stack::Stack;
use log::*;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    /// Pop from an empty stack or push onto a full one
    StackFault,
    /// The cell at PC does not decode to an instruction
    NotAnOpcode { byte: Byte },
    /// PC left the memory image
    PcOutOfBounds,
}

impl fmt::Display for ExecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecErrorKind::StackFault => f.write_str("stack overflow/underflow"),
            ExecErrorKind::NotAnOpcode { byte } => write!(f, "\"x{:02X}\" is not an opcode", byte),
            ExecErrorKind::PcOutOfBounds => f.write_str("PC out of bounds"),
        }
    }
}

/// A failed execution step together with the program counter it failed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub pc: Word,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error at address x{:02X}: {}", self.pc, self.kind)
    }
}

impl error::Error for ExecError {}

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

/// Emulates the stack CPU
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Processor {
    /// Program counter
    pub pc: Word,
    /// Halt flag. Set by HALT and before the first reset
    pub halted: bool,
    /// Operands and results
    pub data_stack: Stack,
    /// Return addresses and values moved with `>R`
    pub return_stack: Stack,
}

impl Default for Processor {
    /// A halted CPU with empty stacks
    fn default() -> Self {
        Self {
            pc: 0,
            halted: true,
            data_stack: Stack::new(),
            return_stack: Stack::new(),
        }
    }
}

impl Processor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears both stacks and makes the CPU runnable from address 0
    pub fn reset(&mut self) {
        self.pc = 0;
        self.halted = false;
        self.data_stack.clear();
        self.return_stack.clear();
    }

    fn error(&self, kind: ExecErrorKind) -> ExecError {
        ExecError { kind, pc: self.pc }
    }

    fn pop_data(&mut self) -> Result<Word> {
        self.data_stack
            .pop()
            .map_err(|_| self.error(ExecErrorKind::StackFault))
    }

    fn push_data(&mut self, value: Word) -> Result<()> {
        self.data_stack
            .push(value)
            .map_err(|_| self.error(ExecErrorKind::StackFault))
    }

    fn pop_return(&mut self) -> Result<Word> {
        self.return_stack
            .pop()
            .map_err(|_| self.error(ExecErrorKind::StackFault))
    }

    fn push_return(&mut self, value: Word) -> Result<()> {
        self.return_stack
            .push(value)
            .map_err(|_| self.error(ExecErrorKind::StackFault))
    }

    /// Pops `b`, then `a`, and pushes `op(a, b)`
    fn binary(&mut self, op: impl FnOnce(Word, Word) -> Word) -> Result<()> {
        let b = self.pop_data()?;
        let a = self.pop_data()?;
        self.push_data(op(a, b))
    }

    /// Executes a single instruction. Branching instructions set PC themselves,
    /// every other instruction advances it by its width.
    pub fn execute_instruction(
        &mut self,
        instruction: Instruction,
        memory: &mut Memory,
    ) -> Result<()> {
        match instruction {
            Instruction::LIT => {
                let value = memory.read_word(self.pc.wrapping_add(1));
                self.push_data(value)?;

                debug!("LIT {}", value);
            }
            Instruction::FETCH => {
                let address = self.pop_data()?;
                let value = memory.read_word(address);
                self.push_data(value)?;

                debug!("@ {}: {}", address, value);
            }
            Instruction::STORE => {
                let address = self.pop_data()?;
                let value = self.pop_data()?;
                memory.write_word(address, value);

                debug!("! {} {}", value, address);
            }
            Instruction::DROP => {
                let value = self.pop_data()?;

                debug!("DROP {}", value);
            }
            Instruction::DUP => {
                let value = self
                    .data_stack
                    .peek()
                    .map_err(|_| self.error(ExecErrorKind::StackFault))?;
                self.push_data(value)?;

                debug!("DUP {}", value);
            }
            Instruction::OVER => {
                let top = self.pop_data()?;
                let below = self.data_stack.peek();
                self.push_data(top)?;
                let below = below.map_err(|_| self.error(ExecErrorKind::StackFault))?;
                self.push_data(below)?;

                debug!("OVER {} {}", below, top);
            }
            Instruction::SWAP => {
                let top = self.pop_data()?;
                let below = match self.data_stack.pop() {
                    Ok(value) => value,
                    Err(_) => {
                        self.push_data(top)?;
                        return Err(self.error(ExecErrorKind::StackFault));
                    }
                };
                self.push_data(top)?;
                self.push_data(below)?;

                debug!("SWAP {} {}", below, top);
            }
            Instruction::ADD => {
                self.binary(Word::wrapping_add)?;

                debug!("+");
            }
            Instruction::SUB => {
                self.binary(Word::wrapping_sub)?;

                debug!("-");
            }
            Instruction::AND => {
                self.binary(|a, b| a & b)?;

                debug!("AND");
            }
            Instruction::OR => {
                self.binary(|a, b| a | b)?;

                debug!("OR");
            }
            Instruction::XOR => {
                self.binary(|a, b| a ^ b)?;

                debug!("XOR");
            }
            Instruction::IF => {
                let condition = self.pop_data()?;
                let target = memory.read_word(self.pc.wrapping_add(1));

                debug!("IF {}: {}", target, condition);

                if condition == 0 {
                    self.pc = target;
                    return Ok(());
                }
            }
            Instruction::CALL => {
                let target = memory.read_word(self.pc.wrapping_add(1));
                self.push_return(self.pc.wrapping_add(2))?;
                self.pc = target;

                debug!("CALL {}", target);
                return Ok(());
            }
            Instruction::EXIT => {
                self.pc = self.pop_return()?;

                debug!("EXIT {}", self.pc);
                return Ok(());
            }
            Instruction::HALT => {
                self.halted = true;

                debug!("HALT");
            }
            Instruction::TOR => {
                let value = self.pop_data()?;
                self.push_return(value)?;

                debug!(">R {}", value);
            }
            Instruction::FROMR => {
                let value = self.pop_return()?;
                self.push_data(value)?;

                debug!("R> {}", value);
            }
        }

        self.pc = self.pc.wrapping_add(instruction.width());

        Ok(())
    }

    /// Returns the instruction PC currently points at, if the cell decodes to one
    pub fn current_instruction(&self, memory: &Memory) -> Option<Instruction> {
        Instruction::decode(memory.read_word(self.pc))
    }

    /// Runs one execution step. Does nothing once the CPU is halted.
    pub fn execute(&mut self, memory: &mut Memory) -> Result<()> {
        if self.halted {
            return Ok(());
        }

        if usize::from(self.pc) >= memory.len() {
            return Err(self.error(ExecErrorKind::PcOutOfBounds));
        }

        let opcode = memory.read_word(self.pc); // Read opcode where PC is
        let instruction = Instruction::decode(opcode).ok_or_else(|| {
            self.error(ExecErrorKind::NotAnOpcode {
                byte: opcode as Byte,
            })
        })?;
        self.execute_instruction(instruction, memory)?;

        if usize::from(self.pc) >= memory.len() {
            return Err(self.error(ExecErrorKind::PcOutOfBounds));
        }

        Ok(())
    }

    /// Runs until HALT or the first failing step
    pub fn execute_until_halt(&mut self, memory: &mut Memory) -> Result<()> {
        while !self.halted {
            self.execute(memory)?;
        }

        info!(
            "Program halted at x{:02X}. Data stack: {:?}",
            self.pc,
            self.data_stack.as_slice()
        );

        Ok(())
    }

    /// Executes a CALL together with everything it invokes as one step. Any
    /// other instruction is executed as a single step.
    pub fn step_over(&mut self, memory: &mut Memory) -> Result<()> {
        let mut depth = 0usize;
        if self.current_instruction(memory) == Some(Instruction::CALL) {
            depth = 1;
        }

        self.execute(memory)?;

        while !self.halted && depth > 0 {
            match self.current_instruction(memory) {
                Some(Instruction::CALL) => depth += 1,
                Some(Instruction::EXIT) => depth -= 1,
                _ => {}
            }
            self.execute(memory)?;
        }

        Ok(())
    }
}

macro_rules! instructions {
    ( $( $( #[doc = $doc:expr] )+ $name:ident = $repr:literal => $mnemonic:literal, $width:literal , )+ ) => {
        /// Defines the instructions. Every opcode has `0xFF` as its upper byte.
        #[repr(u16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(TryFromPrimitive, IntoPrimitive)]
        pub enum Instruction {
            $(
                $( #[doc = $doc] )+
                $name = $repr,
            )+
        }

        impl Instruction {
            pub const ALL: &'static [Self] = &[
                $( Self::$name , )+
            ];

            /// Source text of the instruction
            pub fn mnemonic(&self) -> &'static str {
                match self {
                    $( Self::$name => $mnemonic , )+
                }
            }

            /// Number of cells the instruction occupies, operand included
            pub fn width(&self) -> Word {
                match self {
                    $( Self::$name => $width , )+
                }
            }
        }
    }
}

instructions! {
    /// Push the operand
    LIT = 0xFF00 => "LIT", 2,
    /// Pop an address and push the cell stored there
    FETCH = 0xFF01 => "@", 1,
    /// Pop an address, pop a value and store the value at the address
    STORE = 0xFF02 => "!", 1,
    /// Discard the top of the data stack
    DROP = 0xFF03 => "DROP", 1,
    /// Duplicate the top of the data stack
    DUP = 0xFF04 => "DUP", 1,
    /// Push a copy of the second element
    OVER = 0xFF05 => "OVER", 1,
    /// Exchange the two topmost elements
    SWAP = 0xFF06 => "SWAP", 1,
    /// Add
    ADD = 0xFF07 => "+", 1,
    /// Subtract
    SUB = 0xFF08 => "-", 1,
    /// Bitwise and
    AND = 0xFF09 => "AND", 1,
    /// Bitwise or
    OR = 0xFF0A => "OR", 1,
    /// Bitwise exclusive or
    XOR = 0xFF0B => "XOR", 1,
    /// Jump to the operand address if the popped condition is zero
    IF = 0xFF0C => "IF", 2,
    /// Push the return address and jump to the operand address
    CALL = 0xFF0D => "CALL", 2,
    /// Jump to the address popped off the return stack
    EXIT = 0xFF0E => "EXIT", 0,
    /// Stop the execution of the program
    HALT = 0xFF0F => "HALT", 0,
    /// Move the top of the data stack to the return stack
    TOR = 0xFF10 => ">R", 1,
    /// Move the top of the return stack to the data stack
    FROMR = 0xFF11 => "R>", 1,
}

impl Instruction {
    /// Looks up an instruction by its (uppercase) mnemonic
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|instruction| instruction.mnemonic() == mnemonic)
    }

    /// Classifies a memory cell. Only cells whose upper byte is `0xFF` and whose
    /// lower byte names a known instruction are code; everything else is data.
    pub fn decode(cell: Word) -> Option<Self> {
        if cell >> 8 != 0xFF {
            return None;
        }
        Self::try_from(cell).ok()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
