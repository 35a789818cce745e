//! A FRISC processor simulator
//!
//! Loads a `.p` listing into byte-addressable little-endian memory and
//! executes it word by word, keeping the C/V/N/Z flags in the status
//! register's low nibble. Execution is single-threaded and cooperative:
//! `run` loops until HALT, a breakpoint, an error or `stop`, checking the
//! state between instructions.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;

use crate::binary::{BitVector, Flags};

pub const WORD_SIZE_BYTES: u32 = 4;
pub const HALFWORD_SIZE_BYTES: u32 = 2;
pub const DEFAULT_MEMORY_SIZE_BYTES: usize = 65536;

const FLAG_Z: u32 = 1 << 0;
const FLAG_N: u32 = 1 << 1;
const FLAG_V: u32 = 1 << 2;
const FLAG_C: u32 = 1 << 3;
const FLAG_INTERRUPT: u32 = 1 << 4;

/// Lifecycle of the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Uninitialized,
    Initialized,
    Loaded,
    Running,
    Paused,
    Terminated,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Uninitialized => "uninitialized",
            State::Initialized => "initialized",
            State::Loaded => "loaded",
            State::Running => "running",
            State::Paused => "paused",
            State::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// An error that can occur while loading or running a program
#[derive(Debug)]
pub enum Error {
    /// The listing file could not be read or is malformed
    Load { path: String, detail: String },
    /// A memory access or breakpoint outside the valid range
    InvalidAddress { address: u32 },
    /// An operation was requested in the wrong lifecycle state
    InvalidState { current: State, required: &'static str },
    /// The decoded word is not an instruction
    UnknownOpcode { word: u32, pc: u32 },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Load { path, detail } => write!(f, "failed to load listing {path}: {detail}"),
            Error::InvalidAddress { address } => {
                write!(f, "invalid memory address {address:#010X}")
            }
            Error::InvalidState { current, required } => {
                write!(f, "processor is {current}, expected {required}")
            }
            Error::UnknownOpcode { word, pc } => {
                write!(f, "unknown instruction {word:#010X} at {pc:#010X}")
            }
        }
    }
}

#[derive(Debug)]
struct Registers {
    pc: u32,
    sr: u32,
    general: [u32; 8],
}

impl Registers {
    fn new() -> Registers {
        Registers { pc: 0, sr: 0, general: [0; 8] }
    }

    /// R0 reads as zero
    fn get(&self, index: usize) -> u32 {
        if index == 0 { 0 } else { self.general[index] }
    }

    fn set(&mut self, index: usize, value: u32) {
        self.general[index] = value;
    }

    fn flags(&self) -> Flags {
        Flags {
            c: self.sr & FLAG_C != 0,
            v: self.sr & FLAG_V != 0,
            n: self.sr & FLAG_N != 0,
            z: self.sr & FLAG_Z != 0,
        }
    }

    fn set_flags(&mut self, flags: Flags) {
        let packed = flags.c as u32 * FLAG_C
            | flags.v as u32 * FLAG_V
            | flags.n as u32 * FLAG_N
            | flags.z as u32 * FLAG_Z;
        self.sr = self.sr & !(FLAG_C | FLAG_V | FLAG_N | FLAG_Z) | packed;
    }
}

/// Structure representing the state of the simulated processor
pub struct Simulator {
    memory: Vec<u8>,
    annotations: HashMap<u32, String>,
    registers: Registers,
    breakpoints: HashSet<u32>,
    interrupts_enabled: bool,
    state: State,
}

impl Simulator {
    /// Create a simulator owning `memory_bytes` of zeroed memory
    pub fn new(memory_bytes: usize) -> Simulator {
        Simulator {
            memory: vec![0; memory_bytes],
            annotations: HashMap::new(),
            registers: Registers::new(),
            breakpoints: HashSet::new(),
            interrupts_enabled: true,
            state: State::Initialized,
        }
    }

    /// Drop the loaded program and return to the freshly-initialized state
    pub fn reset(&mut self) {
        self.memory.fill(0);
        self.annotations.clear();
        self.breakpoints.clear();
        self.registers = Registers::new();
        self.interrupts_enabled = true;
        self.state = State::Initialized;
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Load a `.p` listing file into memory
    pub fn load(&mut self, path: &str) -> Result<(), Error> {
        let text = fs::read_to_string(path)
            .map_err(|error| Error::Load { path: path.to_string(), detail: error.to_string() })?;
        self.load_listing(&text).map_err(|error| match error {
            Error::Load { detail, .. } => Error::Load { path: path.to_string(), detail },
            other => other,
        })
    }

    /// Load listing text into memory
    ///
    /// Columns 0..8 hold the hexadecimal row address (blank rows continue
    /// at the previous address plus one word), columns 10..21 the four
    /// machine-code bytes least significant first, and everything from
    /// column 22 is kept as the row's annotation.
    pub fn load_listing(&mut self, text: &str) -> Result<(), Error> {
        if self.state != State::Initialized {
            return Err(Error::InvalidState { current: self.state, required: "initialized" });
        }

        let mut previous: u32 = 0;
        for (index, line) in text.lines().enumerate() {
            let row = index + 1;
            let code = line.get(..21).unwrap_or(line);
            if code.trim().is_empty() {
                continue;
            }

            let address_text = line.get(..8).unwrap_or("").trim();
            let address = if address_text.is_empty() {
                previous.wrapping_add(WORD_SIZE_BYTES)
            } else {
                u32::from_str_radix(address_text, 16).map_err(|_| {
                    malformed(row, format!("bad address \"{address_text}\""))
                })?
            };

            let byte_text = line
                .get(10..21)
                .ok_or_else(|| malformed(row, "truncated machine-code columns".to_string()))?;
            let mut bytes = Vec::new();
            for part in byte_text.split_whitespace() {
                let byte = BitVector::from_hex(8, part)
                    .ok_or_else(|| malformed(row, format!("bad byte \"{part}\"")))?;
                bytes.push(byte.value() as u8);
            }
            if bytes.len() != WORD_SIZE_BYTES as usize {
                return Err(malformed(row, "expected four machine-code bytes".to_string()));
            }
            for (offset, byte) in bytes.iter().enumerate() {
                self.set_byte(address.wrapping_add(offset as u32), *byte)?;
            }

            if let Some(annotation) = line.get(22..) {
                let annotation = annotation.trim();
                if !annotation.is_empty() {
                    self.annotations.insert(address, annotation.to_string());
                }
            }
            previous = address;
        }

        self.state = State::Loaded;
        Ok(())
    }

    /// Run until HALT, a breakpoint, an error or `stop`
    pub fn run(&mut self) -> Result<(), Error> {
        if !matches!(self.state, State::Loaded | State::Paused) {
            return Err(Error::InvalidState { current: self.state, required: "loaded or paused" });
        }
        self.state = State::Running;
        let mut resuming = true;
        while self.state == State::Running {
            // breakpoints stop before the fetch, but never the instruction
            // execution is resuming from
            if !resuming && self.breakpoints.contains(&self.registers.pc) {
                self.state = State::Paused;
                break;
            }
            resuming = false;
            self.execute_single()?;
        }
        Ok(())
    }

    /// Execute one instruction and pause
    pub fn step(&mut self) -> Result<(), Error> {
        if !matches!(self.state, State::Loaded | State::Paused) {
            return Err(Error::InvalidState { current: self.state, required: "loaded or paused" });
        }
        self.execute_single()?;
        if self.state != State::Terminated {
            self.state = State::Paused;
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), Error> {
        if self.state != State::Running {
            return Err(Error::InvalidState { current: self.state, required: "running" });
        }
        self.state = State::Paused;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), Error> {
        if !matches!(self.state, State::Loaded | State::Running | State::Paused) {
            return Err(Error::InvalidState {
                current: self.state,
                required: "loaded, running or paused",
            });
        }
        self.state = State::Terminated;
        Ok(())
    }

    /// Add or remove a breakpoint at a word-aligned address
    pub fn toggle_breakpoint(&mut self, address: u32) -> Result<(), Error> {
        if address % WORD_SIZE_BYTES != 0 || address as usize >= self.memory.len() {
            return Err(Error::InvalidAddress { address });
        }
        if !self.breakpoints.remove(&address) {
            self.breakpoints.insert(address);
        }
        Ok(())
    }

    pub fn is_breakpoint_at(&self, address: u32) -> bool {
        self.breakpoints.contains(&address)
    }

    /// Read-only register access by name: R0..R7, SP, PC or SR
    pub fn read_register(&self, name: &str) -> Option<u32> {
        let name = name.to_uppercase();
        match name.as_str() {
            "PC" => Some(self.registers.pc),
            "SR" => Some(self.registers.sr),
            "SP" => Some(self.registers.get(7)),
            _ => {
                let index: usize = name.strip_prefix('R')?.parse().ok()?;
                (index < 8).then(|| self.registers.get(index))
            }
        }
    }

    pub fn read_memory(&self, address: u32, length: usize) -> Result<Vec<u8>, Error> {
        (0..length).map(|offset| self.byte_at(address.wrapping_add(offset as u32))).collect()
    }

    /// The source text the listing attached to this address, if any
    pub fn annotation(&self, address: u32) -> Option<&str> {
        self.annotations.get(&address).map(String::as_str)
    }

    /// Whether the global interrupt flag is set (RETN re-enables it)
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// Fetch and execute the instruction at PC
    ///
    /// On a fault the program counter rolls back to the faulting
    /// instruction and the processor parks in the paused state.
    fn execute_single(&mut self) -> Result<(), Error> {
        let pc = self.registers.pc;
        let outcome = self.cycle(pc);
        if outcome.is_err() {
            self.registers.pc = pc;
            self.state = State::Paused;
        }
        outcome
    }

    fn cycle(&mut self, pc: u32) -> Result<(), Error> {
        let word = self.word_at(pc)?;
        self.registers.pc = pc.wrapping_add(WORD_SIZE_BYTES);
        self.execute_instruction(word, pc)
    }

    fn execute_instruction(&mut self, word: u32, pc: u32) -> Result<(), Error> {
        let opcode = word >> 27;
        let immediate_operand = word >> 26 & 1 == 1;
        let dst = (word >> 23 & 0b111) as usize;
        let src1 = (word >> 20 & 0b111) as usize;
        let src2 = (word >> 17 & 0b111) as usize;
        let immediate = sign_extend_20(word & 0xFFFFF);
        let condition = word >> 22 & 0b1111;
        let return_type = word & 0b11;

        let operand1 = self.registers.get(src1);
        let operand2 = if immediate_operand { immediate } else { self.registers.get(src2) };

        match opcode {
            0b00000 => {
                // a nonzero src1 field carries the SR transfer flags
                let mut value = operand2;
                let mut to_status = false;
                if src1 != 0 {
                    if word >> 21 & 1 == 1 {
                        value = self.registers.sr;
                    }
                    if word >> 20 & 1 == 1 {
                        to_status = true;
                    }
                }
                if to_status {
                    self.registers.sr = value;
                } else {
                    self.registers.set(dst, value);
                }
            }
            0b00001..=0b01101 => {
                let lhs = BitVector::word(operand1);
                let rhs = BitVector::word(operand2);
                let carry = self.registers.flags().c;
                let result = match opcode {
                    0b00001 => lhs | rhs,
                    0b00010 => lhs & rhs,
                    0b00011 => lhs ^ rhs,
                    0b00100 => lhs + rhs,
                    0b00101 => lhs.adc(rhs, carry),
                    0b00110 => lhs - rhs,
                    0b00111 => lhs.sbc(rhs, carry),
                    0b01000 => lhs.rotl(rhs),
                    0b01001 => lhs.rotr(rhs),
                    0b01010 => lhs << rhs,
                    0b01011 => lhs >> rhs,
                    0b01100 => lhs.ashr(rhs),
                    _ => lhs - rhs, // CMP keeps only the flags
                };
                if opcode != 0b01101 {
                    self.registers.set(dst, result.value());
                }
                self.registers.set_flags(result.flags());
            }
            0b10000 => {
                // POP reads before the stack pointer moves, so POP R7
                // ends with the popped value
                let value = self.word_at(self.registers.get(7))?;
                let pointer = self.registers.get(7).wrapping_add(WORD_SIZE_BYTES);
                self.registers.set(7, pointer);
                self.registers.set(dst, value);
            }
            0b10001 => {
                let pointer = self.registers.get(7).wrapping_sub(WORD_SIZE_BYTES);
                self.set_word(pointer, self.registers.get(dst))?;
                self.registers.set(7, pointer);
            }
            0b10010..=0b10111 => {
                let address =
                    if immediate_operand { operand1.wrapping_add(immediate) } else { immediate };
                match opcode {
                    0b10010 => {
                        let value = self.byte_at(address)?;
                        self.registers.set(dst, value as u32);
                    }
                    0b10011 => self.set_byte(address, self.registers.get(dst) as u8)?,
                    0b10100 => {
                        let value = self.halfword_at(address & !1)?;
                        self.registers.set(dst, value as u32);
                    }
                    0b10101 => self.set_halfword(address & !1, self.registers.get(dst) as u16)?,
                    0b10110 => {
                        let value = self.word_at(address & !0b11)?;
                        self.registers.set(dst, value);
                    }
                    _ => self.set_word(address & !0b11, self.registers.get(dst))?,
                }
            }
            0b11000 | 0b11001 | 0b11010 | 0b11011 | 0b11111 => {
                let taken = condition_match(condition, self.registers.flags())
                    .ok_or(Error::UnknownOpcode { word, pc })?;
                if taken {
                    match opcode {
                        0b11000 => self.registers.pc = operand2,
                        0b11001 => {
                            let pointer = self.registers.get(7).wrapping_sub(WORD_SIZE_BYTES);
                            self.set_word(pointer, self.registers.pc)?;
                            self.registers.set(7, pointer);
                            self.registers.pc = operand2;
                        }
                        0b11010 => {
                            self.registers.pc = self.registers.pc.wrapping_add(immediate);
                        }
                        0b11011 => {
                            let value = self.word_at(self.registers.get(7))?;
                            self.registers.set(7, self.registers.get(7).wrapping_add(WORD_SIZE_BYTES));
                            self.registers.pc = value;
                            if return_type == 0b01 {
                                self.registers.sr |= FLAG_INTERRUPT;
                            } else if return_type == 0b11 {
                                self.interrupts_enabled = true;
                            }
                        }
                        _ => self.state = State::Terminated,
                    }
                }
            }
            _ => return Err(Error::UnknownOpcode { word, pc }),
        }
        Ok(())
    }

    // Memory access, little-endian

    fn byte_at(&self, address: u32) -> Result<u8, Error> {
        self.memory.get(address as usize).copied().ok_or(Error::InvalidAddress { address })
    }

    fn halfword_at(&self, address: u32) -> Result<u16, Error> {
        Ok(self.byte_at(address)? as u16 | (self.byte_at(address.wrapping_add(1))? as u16) << 8)
    }

    fn word_at(&self, address: u32) -> Result<u32, Error> {
        let mut word = 0u32;
        for offset in (0..WORD_SIZE_BYTES).rev() {
            word = word << 8 | self.byte_at(address.wrapping_add(offset))? as u32;
        }
        Ok(word)
    }

    fn set_byte(&mut self, address: u32, value: u8) -> Result<(), Error> {
        match self.memory.get_mut(address as usize) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::InvalidAddress { address }),
        }
    }

    fn set_halfword(&mut self, address: u32, value: u16) -> Result<(), Error> {
        self.set_range(address, &value.to_le_bytes())
    }

    fn set_word(&mut self, address: u32, value: u32) -> Result<(), Error> {
        self.set_range(address, &value.to_le_bytes())
    }

    /// Writes happen only after the whole range is known to be valid
    fn set_range(&mut self, address: u32, bytes: &[u8]) -> Result<(), Error> {
        let start = address as usize;
        if start + bytes.len() > self.memory.len() {
            return Err(Error::InvalidAddress { address });
        }
        self.memory[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

fn malformed(row: usize, detail: String) -> Error {
    Error::Load { path: "<listing>".to_string(), detail: format!("row {row}: {detail}") }
}

fn sign_extend_20(value: u32) -> u32 {
    if value & 0x80000 != 0 { value | 0xFFF0_0000 } else { value }
}

/// Evaluate a 4-bit condition code against the flags; `None` for the one
/// encoding no condition maps to
fn condition_match(condition: u32, flags: Flags) -> Option<bool> {
    let Flags { c, v, n, z } = flags;
    Some(match condition {
        0b0000 => true,
        0b0001 => n,
        0b0010 => !n,
        0b0011 => c,
        0b0100 => !c,
        0b0101 => v,
        0b0110 => !v,
        0b0111 => z,
        0b1000 => !z,
        0b1001 => !c || z,
        0b1010 => c && !z,
        0b1011 => n != v,
        0b1100 => n != v || z,
        0b1101 => n == v,
        0b1110 => n == v && !z,
        _ => return None,
    })
}
