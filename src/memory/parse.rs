//! Assembler for the stack CPU.
//!
//! ```text
//! :START  LIT 5       ; push 5
//!         LIT X03
//!         CALL :ADD
//!         HALT
//! :ADD    +
//!         EXIT
//! ```
//!
//! Tokens are separated by spaces or tabs, `;` starts a comment and line
//! boundaries carry no meaning. A token starting with `:` defines a label,
//! unless it sits in the operand slot of `LIT`, `IF` or `CALL`, where it refers
//! to one.

use std::error;
use std::fmt;
use std::num::ParseIntError;

use crate::processor::Instruction;

use super::{Memory, Word};

const LABEL_MARKER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    LabelRedeclared { label: String },
    InvalidInteger { token: String },
    UndeclaredLabel { label: String },
    SubrangeBounds { token: String },
    OutOfMemory,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::LabelRedeclared { label } => write!(f, "label redeclared: {}", label),
            ParseErrorKind::InvalidInteger { token } => {
                write!(f, "\"{}\" is not a valid integer value", token)
            }
            ParseErrorKind::UndeclaredLabel { label } => write!(f, "undeclared label: {}", label),
            ParseErrorKind::SubrangeBounds { token } => {
                write!(f, "constant value violates subrange bounds: {}", token)
            }
            ParseErrorKind::OutOfMemory => f.write_str("out of memory"),
        }
    }
}

/// A failed compile together with the token index it was detected at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub address: usize,
}

impl ParseError {
    fn new(kind: ParseErrorKind, address: usize) -> Self {
        Self { kind, address }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compile error at address x{:02X}: {}", self.address, self.kind)
    }
}

impl error::Error for ParseError {}

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// Parses an integer literal. `B` selects binary, `0X` or `X` hexadecimal,
/// anything else is decimal (with an optional sign). Binary and hexadecimal
/// literals are read as 32-bit two's complement patterns.
pub fn parse_number(token: &str) -> Result<i32, ParseIntError> {
    if let Some(digits) = token.strip_prefix('B') {
        u32::from_str_radix(digits, 2).map(|value| value as i32)
    } else if let Some(digits) = token.strip_prefix("0X") {
        u32::from_str_radix(digits, 16).map(|value| value as i32)
    } else if let Some(digits) = token.strip_prefix('X') {
        u32::from_str_radix(digits, 16).map(|value| value as i32)
    } else {
        token.parse::<i32>()
    }
}

/// Splits source lines into uppercase tokens. Whitespace separates tokens and a
/// `;` drops the rest of its line, including a token being built when it is hit.
pub fn tokenize<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tokens = Vec::new();

    for line in lines {
        let mut token = String::new();

        for c in line.as_ref().chars() {
            match c {
                ' ' | '\t' => {
                    if !token.is_empty() {
                        tokens.push(token.to_uppercase());
                        token.clear();
                    }
                }
                ';' => {
                    token.clear();
                    break;
                }
                _ => token.push(c),
            }
        }

        if !token.is_empty() {
            tokens.push(token.to_uppercase());
        }
    }

    tokens
}

fn is_label(token: &str) -> bool {
    token.starts_with(LABEL_MARKER)
}

/// A cell holds anything from `i16::MIN` up to `u16::MAX`; negatives are stored
/// two's complement.
fn fits_cell(value: i32) -> bool {
    (i32::from(i16::MIN)..=i32::from(u16::MAX)).contains(&value)
}

/// Width of the instruction named by `token`, 0 if it names none
fn width_of(token: &str) -> usize {
    Instruction::from_mnemonic(token)
        .map(|instruction| usize::from(instruction.width()))
        .unwrap_or(0)
}

/// A label definition and the address it resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub address: usize,
}

#[derive(Debug, Clone)]
pub struct Parser {
    tokens: Vec<String>,
    labels: Vec<Label>,
    memory_size: usize,
}

impl Parser {
    /// Creates a parser for `lines` which will assemble into `memory_size` cells.
    pub fn new<I, S>(lines: I, memory_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokenize(lines),
            labels: Vec::new(),
            memory_size,
        }
    }

    /// Consumes `self` and assembles the tokens into a memory template.
    ///
    /// # Errors
    ///
    /// The first error stops the compile; nothing is written anywhere else.
    pub fn parse(mut self) -> Result<Memory> {
        self.collect_labels()?;
        self.substitute_labels();
        self.encode()
    }

    /// Labels recorded so far
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Records and removes label definitions and rewrites operand literals as
    /// decimals. A label is bound to the index it leaves behind, i.e. the index
    /// of the token following it once every earlier label is gone.
    fn collect_labels(&mut self) -> Result<()> {
        let mut i = 0;

        while i < self.tokens.len() {
            if is_label(&self.tokens[i]) {
                let name = self.tokens.remove(i);

                if self.labels.iter().any(|label| label.name == name) {
                    return Err(ParseError::new(
                        ParseErrorKind::LabelRedeclared { label: name },
                        i,
                    ));
                }

                log::debug!("[{}] Found label {}", i, name);
                self.labels.push(Label { name, address: i });
                continue;
            }

            let width = width_of(&self.tokens[i]);
            for operand in 1..width {
                let position = i + operand;
                if position >= self.tokens.len() {
                    break;
                }
                self.rewrite_operand(position)?;
            }

            i += width.max(1);
        }

        Ok(())
    }

    /// Validates the literal operand at `position` and replaces it by its
    /// decimal rendering. Label references are left for the next pass.
    fn rewrite_operand(&mut self, position: usize) -> Result<()> {
        let token = &self.tokens[position];
        if is_label(token) {
            return Ok(());
        }

        let value = parse_number(token).map_err(|_| {
            ParseError::new(
                ParseErrorKind::InvalidInteger {
                    token: token.clone(),
                },
                position,
            )
        })?;

        if value.unsigned_abs() & 0xFF00 != 0 {
            return Err(ParseError::new(
                ParseErrorKind::SubrangeBounds {
                    token: token.clone(),
                },
                position,
            ));
        }

        log::debug!("[{}] Operand {} = {}", position, token, value);
        self.tokens[position] = value.to_string();

        Ok(())
    }

    /// Replaces label references by the addresses of their definitions.
    /// Unknown references stay as they are and fail during encoding.
    fn substitute_labels(&mut self) {
        for token in self.tokens.iter_mut().filter(|token| is_label(token)) {
            if let Some(label) = self.labels.iter().find(|label| label.name == *token) {
                *token = label.address.to_string();
            }
        }
    }

    /// Resolves every token to a cell and lays the cells out from address 0.
    fn encode(&self) -> Result<Memory> {
        let mut cells = Vec::with_capacity(self.tokens.len());

        for (i, token) in self.tokens.iter().enumerate() {
            let cell = match Instruction::from_mnemonic(token) {
                Some(instruction) => Word::from(instruction),
                None => match parse_number(token) {
                    Ok(value) if fits_cell(value) => value as Word,
                    Ok(_) => {
                        return Err(ParseError::new(
                            ParseErrorKind::SubrangeBounds {
                                token: token.clone(),
                            },
                            i,
                        ))
                    }
                    Err(_) if is_label(token) => {
                        return Err(ParseError::new(
                            ParseErrorKind::UndeclaredLabel {
                                label: token.clone(),
                            },
                            i,
                        ))
                    }
                    Err(_) => {
                        return Err(ParseError::new(
                            ParseErrorKind::InvalidInteger {
                                token: token.clone(),
                            },
                            i,
                        ))
                    }
                },
            };
            cells.push(cell);
        }

        if cells.len() > self.memory_size {
            return Err(ParseError::new(
                ParseErrorKind::OutOfMemory,
                self.memory_size,
            ));
        }

        let mut memory = Memory::new(self.memory_size);
        memory.data[..cells.len()].copy_from_slice(&cells);

        log::debug!("Encoded {} of {} cells", cells.len(), self.memory_size);

        Ok(memory)
    }
}
