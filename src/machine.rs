use std::error;
use std::fmt;

use crate::memory::parse::{ParseError, Parser};
use crate::memory::{Cell, Memory, Word};
use crate::processor::{ExecError, Processor};
use log::*;

/// Memory size used when nothing else is configured
pub const DEFAULT_MEMORY_SIZE: usize = 32;

/// Largest memory image; keeps `PC + width` inside a cell
pub const MAX_MEMORY_SIZE: usize = 0x8000;

/// Smallest block offered by the block size selector
const BLOCK_SIZE: usize = 16;

/// Rejected memory size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigError {
    pub memory_size: usize,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory size {} is outside 1..={}",
            self.memory_size, MAX_MEMORY_SIZE
        )
    }
}

impl error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of cells in the memory image
    pub memory_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }
}

impl Config {
    pub fn new(memory_size: usize) -> Result<Self, ConfigError> {
        if memory_size == 0 || memory_size > MAX_MEMORY_SIZE {
            return Err(ConfigError { memory_size });
        }
        Ok(Self { memory_size })
    }

    /// Memory of `16 << index` cells, the sizes a block selector offers
    pub fn from_block_index(index: u32) -> Result<Self, ConfigError> {
        let memory_size = BLOCK_SIZE
            .checked_shl(index)
            .filter(|size| size >> index == BLOCK_SIZE)
            .unwrap_or(usize::MAX);
        Self::new(memory_size)
    }
}

/// Reset requested before any program was compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotCompiled;

impl fmt::Display for NotCompiled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no program has been compiled")
    }
}

impl error::Error for NotCompiled {}

/// The last failure seen by a [`Machine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Compile(ParseError),
    Runtime(ExecError),
}

impl Error {
    /// Token index for compile errors, PC for runtime errors
    pub fn address(&self) -> usize {
        match self {
            Error::Compile(err) => err.address,
            Error::Runtime(err) => usize::from(err.pc),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Compile(err) => err.fmt(f),
            Error::Runtime(err) => err.fmt(f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Compile(err) => Some(err),
            Error::Runtime(err) => Some(err),
        }
    }
}

/// Everything a front end drives: source, compiled template, working memory and
/// the CPU. All state lives here and is only changed through `&mut self`.
#[derive(Debug, Clone)]
pub struct Machine {
    config: Config,
    lines: Vec<String>,
    template: Option<Memory>,
    memory: Memory,
    cpu: Processor,
    last_error: Option<Error>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Machine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            lines: Vec::new(),
            template: None,
            memory: Memory::new(config.memory_size),
            cpu: Processor::new(),
            last_error: None,
        }
    }

    /// Sets the memory size used by the next compile
    pub fn set_memory_size(&mut self, memory_size: usize) -> Result<(), ConfigError> {
        self.config = Config::new(memory_size)?;
        Ok(())
    }

    pub fn config(&self) -> Config {
        self.config
    }

    /// Replaces the source lines
    pub fn set_lines<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
    }

    /// Replaces the source with `source` split into lines, empty lines dropped
    pub fn load_source(&mut self, source: &str) {
        self.set_lines(source.lines().filter(|line| !line.is_empty()));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Assembles the current source. On success the template is replaced and
    /// the machine is reset; on failure nothing but the last error changes.
    pub fn compile(&mut self) -> Result<(), ParseError> {
        match Parser::new(&self.lines, self.config.memory_size).parse() {
            Ok(template) => {
                info!("Compiled {} lines into {} cells", self.lines.len(), template.len());
                self.template = Some(template);
                self.reset_from_template();
                Ok(())
            }
            Err(err) => {
                warn!("{}", err);
                self.last_error = Some(Error::Compile(err.clone()));
                Err(err)
            }
        }
    }

    /// Clears both stacks, rewinds PC and restores memory from the template
    pub fn reset(&mut self) -> Result<(), NotCompiled> {
        if self.template.is_none() {
            return Err(NotCompiled);
        }
        self.reset_from_template();
        Ok(())
    }

    fn reset_from_template(&mut self) {
        if let Some(template) = &self.template {
            self.memory.clone_from(template);
            self.cpu.reset();
        }
    }

    fn record(&mut self, result: Result<(), ExecError>) -> Result<(), ExecError> {
        if let Err(err) = &result {
            warn!("{}", err);
            self.last_error = Some(Error::Runtime(*err));
        }
        result
    }

    /// Steps until HALT or the first failing step
    pub fn run(&mut self) -> Result<(), ExecError> {
        let result = self.cpu.execute_until_halt(&mut self.memory);
        self.record(result)
    }

    /// Executes exactly one instruction
    pub fn step_into(&mut self) -> Result<(), ExecError> {
        let result = self.cpu.execute(&mut self.memory);
        self.record(result)
    }

    /// Executes one instruction, or a whole CALL up to its matching EXIT
    pub fn step_over(&mut self) -> Result<(), ExecError> {
        let result = self.cpu.step_over(&mut self.memory);
        self.record(result)
    }

    /// Current PC, `None` before the first successful compile
    pub fn pc(&self) -> Option<Word> {
        self.template.as_ref().map(|_| self.cpu.pc)
    }

    pub fn is_halted(&self) -> bool {
        self.cpu.halted
    }

    pub fn data_stack(&self) -> &[Word] {
        self.cpu.data_stack.as_slice()
    }

    pub fn return_stack(&self) -> &[Word] {
        self.cpu.return_stack.as_slice()
    }

    /// Working memory
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Compiled memory image, if any
    pub fn template(&self) -> Option<&Memory> {
        self.template.as_ref()
    }

    pub fn cell(&self, address: Word) -> Cell {
        self.memory.cell(address)
    }

    pub fn processor(&self) -> &Processor {
        &self.cpu
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::parse::ParseErrorKind;
    use crate::processor::{ExecErrorKind, Instruction};
    use crate::stack::MAX_DEPTH;

    use super::*;
    use color_eyre::eyre::Result;

    fn compiled(source: &str, size: usize) -> Result<Machine> {
        let mut machine = Machine::new(Config::new(size)?);
        machine.load_source(source);
        machine.compile()?;
        Ok(machine)
    }

    #[test]
    fn test_initial_state() -> Result<()> {
        let mut machine = Machine::default();

        assert_eq!(machine.pc(), None);
        assert!(machine.is_halted());
        assert_eq!(machine.memory().len(), DEFAULT_MEMORY_SIZE);
        assert_eq!(machine.reset(), Err(NotCompiled));

        machine.run()?;
        machine.step_into()?;
        assert_eq!(machine.pc(), None);

        Ok(())
    }

    #[test]
    fn test_config() -> Result<()> {
        assert_eq!(Config::from_block_index(0)?.memory_size, 16);
        assert_eq!(Config::from_block_index(4)?.memory_size, 256);
        assert!(Config::from_block_index(12).is_err());
        assert!(Config::from_block_index(200).is_err());
        assert_eq!(Config::new(0), Err(ConfigError { memory_size: 0 }));

        let mut machine = Machine::default();
        assert!(machine.set_memory_size(MAX_MEMORY_SIZE + 1).is_err());
        machine.set_memory_size(64)?;
        machine.load_source("HALT");
        machine.compile()?;
        assert_eq!(machine.memory().len(), 64);

        Ok(())
    }

    #[test]
    fn test_run_add() -> Result<()> {
        let mut machine = compiled("LIT 5 LIT 3 + HALT", 16)?;

        assert_eq!(machine.pc(), Some(0));
        assert!(!machine.is_halted());

        machine.run()?;

        assert!(machine.is_halted());
        assert_eq!(machine.data_stack(), &[8]);

        Ok(())
    }

    #[test]
    fn test_endless_call_overflows() -> Result<()> {
        let mut machine = compiled(":LOOP LIT 1 CALL :LOOP HALT", 16)?;
        let err = machine.run().unwrap_err();

        assert_eq!(err.kind, ExecErrorKind::StackFault);
        // The data stack fills up alongside the return stack and LIT trips first
        assert_eq!(err.to_string(), "runtime error at address x00: stack overflow/underflow");
        assert_eq!(machine.data_stack().len(), MAX_DEPTH);
        assert_eq!(machine.return_stack().len(), MAX_DEPTH);
        assert_eq!(machine.last_error(), Some(&Error::Runtime(err)));

        Ok(())
    }

    #[test]
    fn test_drop_empty_stack() -> Result<()> {
        let mut machine = compiled("LIT 1 DROP DROP HALT", 16)?;
        machine.step_into()?;
        machine.step_into()?;
        let err = machine.step_into().unwrap_err();

        assert_eq!(
            err,
            ExecError {
                kind: ExecErrorKind::StackFault,
                pc: 3
            }
        );
        assert_eq!(machine.last_error().map(Error::address), Some(3));

        Ok(())
    }

    #[test]
    fn test_failed_compile_keeps_state() -> Result<()> {
        let mut machine = compiled("LIT 7 LIT 9 HALT", 8)?;
        machine.step_into()?;
        let template = machine.template().cloned();

        machine.load_source(":START\nHALT\n:START");
        let err = machine.compile().unwrap_err();

        assert_eq!(
            err.kind,
            ParseErrorKind::LabelRedeclared {
                label: ":START".into()
            }
        );
        assert_eq!(err.address, 1);
        assert_eq!(machine.template().cloned(), template);
        assert_eq!(machine.pc(), Some(2));
        assert_eq!(machine.data_stack(), &[7]);
        assert_eq!(machine.last_error(), Some(&Error::Compile(err)));

        Ok(())
    }

    #[test]
    fn test_out_of_range_literal() -> Result<()> {
        let mut machine = Machine::new(Config::new(16)?);
        machine.load_source("LIT X100\nHALT");
        let err = machine.compile().unwrap_err();

        assert_eq!(
            err.kind,
            ParseErrorKind::SubrangeBounds {
                token: "X100".into()
            }
        );
        assert_eq!(machine.pc(), None);

        Ok(())
    }

    #[test]
    fn test_reset_is_idempotent() -> Result<()> {
        let mut machine = compiled("LIT 5 LIT 10 ! LIT 1 >R HALT", 16)?;
        let initial = machine.clone();
        machine.run()?;

        assert_eq!(machine.memory().read_word(10), 5);
        assert_eq!(machine.return_stack(), &[1]);

        for _ in 0..3 {
            machine.reset()?;
            assert_eq!(machine.pc(), Some(0));
            assert!(!machine.is_halted());
            assert!(machine.data_stack().is_empty());
            assert!(machine.return_stack().is_empty());
            assert_eq!(machine.memory(), initial.memory());
            assert_eq!(machine.template(), Some(initial.memory()));
            assert_eq!(machine.processor(), initial.processor());
        }

        Ok(())
    }

    #[test]
    fn test_straight_line_runs_off_memory() -> Result<()> {
        let mut machine = compiled("LIT 1 DUP + DUP LIT 2 XOR", 8)?;
        let mut pcs = vec![machine.pc()];
        let err = loop {
            match machine.step_into() {
                Ok(()) => pcs.push(machine.pc()),
                Err(err) => break err,
            }
        };

        assert_eq!(pcs, vec![Some(0), Some(2), Some(3), Some(4), Some(5), Some(7)]);
        assert_eq!(err.kind, ExecErrorKind::PcOutOfBounds);
        assert_eq!(err.pc, 8);

        Ok(())
    }

    #[test]
    fn test_step_over() -> Result<()> {
        let source = "
            LIT 2
            CALL :DOUBLE
            HALT
        :DOUBLE
            DUP CALL :ADD
            EXIT
        :ADD
            +
            EXIT
        ";
        let mut machine = compiled(source, 32)?;
        machine.step_over()?;
        assert_eq!(machine.pc(), Some(2));

        machine.step_over()?;
        assert_eq!(machine.pc(), Some(4));
        assert_eq!(machine.data_stack(), &[4]);
        assert!(machine.return_stack().is_empty());

        machine.step_over()?;
        assert!(machine.is_halted());

        Ok(())
    }

    #[test]
    fn test_store_overwrites_code() -> Result<()> {
        // Turns the trailing `1` into HALT before reaching it
        let mut machine = compiled("LIT -241 LIT 5 ! 1", 8)?;
        machine.run()?;

        assert!(machine.is_halted());
        assert_eq!(machine.cell(5), crate::memory::Cell::Instruction(Instruction::HALT));
        assert_eq!(machine.template().map(|t| t.read_word(5)), Some(1));

        Ok(())
    }

    #[test]
    fn test_countdown_program() -> Result<()> {
        let mut machine = compiled(include_str!("../demos/programs/countdown.asm"), 16)?;
        machine.run()?;

        assert_eq!(machine.data_stack(), &[5, 4, 3, 2, 1, 0]);

        Ok(())
    }

    #[test]
    fn test_sum_program() -> Result<()> {
        let mut machine = compiled(include_str!("../demos/programs/sum.asm"), 32)?;
        machine.run()?;

        assert_eq!(machine.data_stack(), &[7]);
        assert_eq!(machine.memory().read_word(15), 7);
        assert!(machine.return_stack().is_empty());

        Ok(())
    }

    #[test]
    fn test_step_after_leaving_memory() -> Result<()> {
        let mut machine = compiled("LIT 1 DUP", 3)?;
        assert_eq!(machine.run().unwrap_err().kind, ExecErrorKind::PcOutOfBounds);

        let err = machine.step_into().unwrap_err();
        assert_eq!(
            err,
            ExecError {
                kind: ExecErrorKind::PcOutOfBounds,
                pc: 3
            }
        );
        assert_eq!(machine.step_over().unwrap_err(), err);

        Ok(())
    }

    #[test]
    fn test_self_call_overflows_return_stack() -> Result<()> {
        let mut machine = compiled(":F CALL :F", 2)?;
        let err = machine.run().unwrap_err();

        assert_eq!(
            err,
            ExecError {
                kind: ExecErrorKind::StackFault,
                pc: 0
            }
        );
        assert_eq!(machine.return_stack().len(), MAX_DEPTH);
        assert!(machine.return_stack().iter().all(|address| *address == 2));
        assert!(machine.data_stack().is_empty());

        Ok(())
    }
}
