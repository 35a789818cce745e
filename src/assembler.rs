//! Converts FRISC assembly source into a `.p` listing file in a two-pass
//! manner
//!
//! The first pass lexes and parses every line, computes each line's
//! address and builds the symbol table; the second pass encodes every
//! instruction against that table and renders the listing.
//!
//! Comments start with a semicolon (`;`) and continue to the end of the
//! line. Source is case-insensitive. A label is anything starting in
//! column 0, up to the first whitespace; instructions must therefore be
//! indented. Labels bind to the address of their line, except for `EQU`,
//! which binds the label to a plain numeric value:
//!
//! ```ignore
//!         ORG 100
//! LIMIT   EQU 10
//!         MOVE 0, R1
//! LOOP    ADD R1, 1, R1     ; count up to LIMIT
//!         CMP R1, LIMIT
//!         JP_NE LOOP
//!         HALT
//! ```
//!
//! The assembler supports the FRISC instruction set:
//! - arithmetic-logical: ADD, ADC, SUB, SBC, AND, OR, XOR, SHL, SHR,
//!   ASHR, ROTL, ROTR and CMP, as `name src1, (reg|constant)[, dst]`
//! - memory: LOAD/STORE with B/H suffixes for byte and halfword access,
//!   addressing `(constant)`, `(reg)` or `(reg±offset)`
//! - MOVE between registers, from constants, and to or from SR
//! - PUSH and POP through the R7 stack pointer
//! - control flow: JP, CALL, JR and RET/RETI/RETN/HALT, each optionally
//!   suffixed `_COND` with a condition from the table in `grammar`
//!
//! and the pseudo-instructions:
//! - `ORG n`: continue assembling at address `n`
//! - `label EQU n`: bind `label` to the value `n`
//! - `DS n`: reserve `n` bytes, rounded up to whole words
//! - `DB/DH/DW v {, v}`: emit byte/halfword/word data, packed
//!   little-endian
//!
//! Numeric literals default to decimal; `%B`, `%O`, `%D` and `%H`
//! prefixes select a base explicitly and a trailing `H` with a leading
//! digit (`0FFH`) is hexadecimal as well.

pub mod grammar;
pub mod lexer;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use colored::Colorize;

use grammar::{EncodeError, InstructionNode, SymbolTable, parse_instruction};
use lexer::preprocess;

const WORD_SIZE_BYTES: u32 = 4;

/// One source line after the first pass
#[derive(Debug)]
struct PreprocessedLine {
    original: String,
    line_number: usize,
    /// The line's address, or `None` for blank and comment-only lines
    address: Option<u32>,
    /// `true` when the line contributes no listing row of its own
    empty: bool,
    instruction: Option<InstructionNode>,
}

/// An error that can occur during the assembly process
#[derive(Debug)]
pub enum Error {
    /// The lexer or parser rejected a line
    Syntax { line_number: usize, lexeme: String, line: String },
    /// An instruction could not be encoded into machine words
    Encode { line_number: usize, reason: String, line: String },
    /// A referenced label is not defined anywhere in the file
    UndefinedLabel { line_number: usize, name: String, line: String },
    /// A label is defined more than once
    DuplicateLabel { name: String, first: usize, second: usize },
    /// The source file could not be read
    Read { path: String },
    /// The listing file could not be written
    Write { path: String, detail: String },
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Syntax { line_number, lexeme, line } => {
                if lexeme.is_empty() {
                    writeln!(f, "syntax error at line {line_number}: unexpected end of line")?;
                } else {
                    writeln!(f, "syntax error at line {line_number}: cannot match \"{lexeme}\"")?;
                }
                write_underlined(f, *line_number, line, lexeme)
            }
            Error::Encode { line_number, reason, line } => {
                writeln!(f, "cannot encode line {line_number}: {reason}")?;
                write!(f, "{line_number}\t{line}")
            }
            Error::UndefinedLabel { line_number, name, line } => {
                writeln!(f, "undefined label \"{name}\" at line {line_number}")?;
                write_underlined(f, *line_number, line, name)
            }
            Error::DuplicateLabel { name, first, second } => write!(
                f,
                "duplicate label \"{name}\": first defined at line {first}, redefined at line {second}"
            ),
            Error::Read { path } => write!(f, "failed to read file {path}"),
            Error::Write { path, detail } => write!(f, "failed to write file {path}: {detail}"),
        }
    }
}

fn write_underlined(
    f: &mut fmt::Formatter<'_>,
    line_number: usize,
    line: &str,
    lexeme: &str,
) -> fmt::Result {
    write!(f, "{line_number}\t{line}")?;
    if !lexeme.is_empty() {
        if let Some(start) = line.to_uppercase().find(lexeme) {
            let underline = format!("{}{}", " ".repeat(start), "^".repeat(lexeme.len()));
            writeln!(f)?;
            write!(f, "\t{}", underline.green())?;
        }
    }
    Ok(())
}

/// Assemble a source file; the listing is written next to it with a `.p`
/// extension and its path is returned
pub fn assemble_file(path: &str) -> Result<PathBuf, Error> {
    let source = fs::read_to_string(path).map_err(|_| Error::Read { path: path.to_string() })?;
    let listing = assemble_source(&source)?;
    let output = Path::new(path).with_extension("p");
    fs::write(&output, listing).map_err(|error| Error::Write {
        path: output.display().to_string(),
        detail: error.to_string(),
    })?;
    Ok(output)
}

/// Assemble source text into listing text
pub fn assemble_source(source: &str) -> Result<String, Error> {
    let (lines, symbols) = first_pass(source)?;
    second_pass(&lines, &symbols)
}

/// Entry point for external front ends: a message and a success flag
pub fn assemble(path: &str) -> (String, bool) {
    match assemble_file(path) {
        Ok(output) => (format!("assembled {} into {}", path, output.display()), true),
        Err(error) => (error.to_string(), false),
    }
}

fn first_pass(source: &str) -> Result<(Vec<PreprocessedLine>, SymbolTable), Error> {
    let mut symbols = SymbolTable::new();
    let mut definitions: HashMap<String, usize> = HashMap::new();
    let mut lines = Vec::new();
    let mut current: u32 = 0;

    for (index, raw) in source.lines().enumerate() {
        let line_number = index + 1;
        let Some((label, lexemes)) = preprocess(raw) else {
            lines.push(PreprocessedLine {
                original: raw.to_string(),
                line_number,
                address: None,
                empty: true,
                instruction: None,
            });
            continue;
        };

        let instruction = if lexemes.is_empty() {
            None
        } else {
            Some(parse_instruction(&lexemes).map_err(|error| Error::Syntax {
                line_number,
                lexeme: error.lexeme,
                line: raw.to_string(),
            })?)
        };

        let mut next = current;
        let mut equ_value = None;
        if let Some(node) = &instruction {
            match node {
                InstructionNode::Org(_) => {
                    next = address_operand(node, line_number, raw)?;
                }
                InstructionNode::Equ(_) => {
                    let value = node
                        .pseudo_value()
                        .and_then(|value| grammar_wrap(value, raw))
                        .map_err(|error| encode_failure(error, line_number, raw))?;
                    if label.is_empty() {
                        return Err(Error::Encode {
                            line_number,
                            reason: "EQU requires a label".to_string(),
                            line: raw.to_string(),
                        });
                    }
                    equ_value = Some(value);
                }
                InstructionNode::Ds(_) => {
                    let reserved = address_operand(node, line_number, raw)?;
                    next = current.wrapping_add(round_to_word(reserved));
                }
                InstructionNode::Data(_) => {
                    next = current.wrapping_add(node.data_size() * node.data_count());
                }
                _ => next = current.wrapping_add(WORD_SIZE_BYTES),
            }
        }

        // a non-EQU label names the line's own address, before it advances
        if !label.is_empty() {
            let value = equ_value.unwrap_or(current);
            define(&mut symbols, &mut definitions, &label, value, line_number)?;
        }

        let empty = match &instruction {
            Some(node) => !node.emits_code(),
            None => true,
        };
        lines.push(PreprocessedLine {
            original: raw.to_string(),
            line_number,
            address: Some(current),
            empty,
            instruction,
        });
        current = next;
    }

    Ok((lines, symbols))
}

fn second_pass(lines: &[PreprocessedLine], symbols: &SymbolTable) -> Result<String, Error> {
    let mut listing = String::new();
    for line in lines {
        match (&line.instruction, line.address, line.empty) {
            (Some(node), Some(address), false) => {
                let words = node
                    .encode(symbols, address)
                    .map_err(|error| encode_failure(error, line.line_number, &line.original))?;
                let mut rows = words.iter();
                match rows.next() {
                    Some(word) => listing.push_str(&format!(
                        "{:<10}{:<13}{}\n",
                        format!("{address:08X}"),
                        byte_row(*word),
                        line.original
                    )),
                    None => listing.push_str(&blank_row(&line.original)),
                }
                for word in rows {
                    listing.push_str(&format!("{:>21}\n", byte_row(*word)));
                }
            }
            _ => listing.push_str(&blank_row(&line.original)),
        }
    }
    Ok(listing)
}

/// The four bytes of a word in listing order, least significant first
fn byte_row(word: u32) -> String {
    let bytes = word.to_le_bytes();
    format!("{:02X} {:02X} {:02X} {:02X}", bytes[0], bytes[1], bytes[2], bytes[3])
}

fn blank_row(original: &str) -> String {
    format!("{:<10}{:<13}{}\n", "", "", original)
}

fn round_to_word(number: u32) -> u32 {
    if number % WORD_SIZE_BYTES != 0 {
        (number / WORD_SIZE_BYTES + 1) * WORD_SIZE_BYTES
    } else {
        number
    }
}

fn define(
    symbols: &mut SymbolTable,
    definitions: &mut HashMap<String, usize>,
    label: &str,
    value: u32,
    line_number: usize,
) -> Result<(), Error> {
    if let Some(&first) = definitions.get(label) {
        return Err(Error::DuplicateLabel {
            name: label.to_string(),
            first,
            second: line_number,
        });
    }
    definitions.insert(label.to_string(), line_number);
    symbols.insert(label.to_string(), value);
    Ok(())
}

/// ORG and DS operands must be non-negative 32-bit values
fn address_operand(node: &InstructionNode, line_number: usize, line: &str) -> Result<u32, Error> {
    let value = node.pseudo_value().map_err(|error| encode_failure(error, line_number, line))?;
    u32::try_from(value).map_err(|_| Error::Encode {
        line_number,
        reason: format!("address operand {value} out of range"),
        line: line.to_string(),
    })
}

fn grammar_wrap(value: i64, line: &str) -> Result<u32, EncodeError> {
    if !(-(1i64 << 31)..1i64 << 32).contains(&value) {
        return Err(EncodeError::DoesNotFit { text: line.trim().to_string(), bits: 32 });
    }
    Ok(value as u32)
}

fn encode_failure(error: EncodeError, line_number: usize, line: &str) -> Error {
    match error {
        EncodeError::UndefinedLabel { name } => {
            Error::UndefinedLabel { line_number, name, line: line.to_string() }
        }
        other => Error::Encode { line_number, reason: other.to_string(), line: line.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_lines(source: &str) -> Vec<String> {
        assemble_source(source)
            .expect("assembly should succeed")
            .lines()
            .map(|line| line.to_string())
            .collect()
    }

    #[test]
    fn instructions_advance_by_one_word() {
        let lines = listing_lines(" MOVE 1, R1\n MOVE 2, R2\n HALT\n");
        assert!(lines[0].starts_with("00000000  "));
        assert!(lines[1].starts_with("00000004  "));
        assert!(lines[2].starts_with("00000008  "));
    }

    #[test]
    fn org_relocates_and_labels_bind_to_their_line() {
        let lines = listing_lines("\t\tORG 100\nLAB\tMOVE %D 5, R1\n\t\tHALT\n");
        assert!(lines[0].trim().starts_with("ORG"));
        assert!(lines[1].starts_with("00000064  05 00 80 04  "));
        assert!(lines[2].starts_with("00000068  "));
    }

    #[test]
    fn listing_keeps_source_text_and_blank_lines() {
        let listing = assemble_source("; banner\n\n MOVE 1, R1 ; note\n").unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0].trim(), "; banner");
        assert_eq!(lines[1].trim(), "");
        assert!(lines[2].ends_with(" MOVE 1, R1 ; note"));
    }

    #[test]
    fn data_listing_rows_match_the_word_layout() {
        let lines = listing_lines("\tORG %H 10\n\tDW 0AABBCCDDH\n");
        assert_eq!(lines[1][..21].trim_end(), "00000010  DD CC BB AA");
    }

    #[test]
    fn multi_word_data_uses_continuation_rows() {
        let lines = listing_lines(" DW 1, 2\n HALT\n");
        assert!(lines[0].starts_with("00000000  01 00 00 00  "));
        assert_eq!(lines[1], format!("{:>21}", "02 00 00 00"));
        // the data occupies both words, so HALT lands at 8
        assert!(lines[2].starts_with("00000008  "));
    }

    #[test]
    fn ds_reserves_whole_words() {
        let lines = listing_lines(" MOVE 1, R1\n DS 6\n HALT\n");
        assert!(lines[2].starts_with("0000000C  "));
    }

    #[test]
    fn equ_binds_a_value_not_an_address() {
        let listing = assemble_source("TEN EQU 10\n MOVE TEN, R1\n HALT\n").unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        // the EQU line itself is address-less
        assert_eq!(lines[0][..10].trim(), "");
        assert!(lines[1].starts_with("00000000  0A 00 "));
    }

    #[test]
    fn equ_without_a_label_is_rejected() {
        let error = assemble_source(" EQU 10\n").unwrap_err();
        assert!(matches!(error, Error::Encode { line_number: 1, .. }));
    }

    #[test]
    fn labels_resolve_forward_and_backward() {
        let listing = assemble_source("BACK HALT\n JP BACK\n JP AHEAD\nAHEAD HALT\n").unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        assert!(lines[1].contains("00 00 00 C4"));
        assert!(lines[2].contains("0C 00 00 C4"));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let error = assemble_source("X HALT\nX HALT\n").unwrap_err();
        match error {
            Error::DuplicateLabel { name, first, second } => {
                assert_eq!((name.as_str(), first, second), ("X", 1, 2));
            }
            other => panic!("expected a duplicate label error, got {other:?}"),
        }
    }

    #[test]
    fn undefined_labels_are_rejected_in_pass_two() {
        let error = assemble_source(" JP NOWHERE\n").unwrap_err();
        assert!(matches!(error, Error::UndefinedLabel { line_number: 1, .. }));
    }

    #[test]
    fn syntax_errors_name_the_offending_lexeme() {
        let error = assemble_source(" MOVE R1,\n").unwrap_err();
        assert!(matches!(error, Error::Syntax { line_number: 1, .. }));
        let message = assemble_source(" FROB R1\n").unwrap_err().to_string();
        assert!(message.contains("FROB"));
    }

    #[test]
    fn label_only_lines_take_the_next_address() {
        let listing = assemble_source("HERE\n HALT\n JP HERE\n").unwrap();
        let lines: Vec<&str> = listing.lines().collect();
        // HERE binds to 0, where HALT lands
        assert!(lines[1].starts_with("00000000  "));
        assert!(lines[2].contains("00 00 00 C4"));
    }

    #[test]
    fn assemble_reports_failure_without_writing() {
        let (message, ok) = assemble("/nonexistent/input.a");
        assert!(!ok);
        assert!(message.contains("failed to read"));
    }
}
