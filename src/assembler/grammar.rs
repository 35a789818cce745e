//! FRISC grammar productions and instruction encoders
//!
//! Each source line parses into one [InstructionNode] variant via an ordered
//! choice over the productions below; the variant then knows how to encode
//! itself into 32-bit machine words. Every word is laid out most significant
//! bit first as `[opcode:5][fn:1][dst:3 or cond:4][src1:3][operand:20]`,
//! where `fn` selects between a register operand (top three bits of the
//! operand field) and a sign-extended 20-bit immediate.
//!
//! Numeric literals: `%B`/`%O` prefix binary and octal, decimal is bare
//! digits or `%D`-prefixed, hexadecimal takes a `%H` prefix or the classic
//! trailing-`H` form with a leading digit (`0FFH`).

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::binary::BitVector;
use crate::peg::{Rule, SyntaxError, Token, TokenKind};

/// A symbol table maps labels to their 32-bit addresses or EQU values
pub type SymbolTable = HashMap<String, u32>;

/// Why an instruction could not be turned into machine words
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A referenced label was never defined
    UndefinedLabel { name: String },
    /// A constant fails the fit test for its field
    DoesNotFit { text: String, bits: u32 },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::UndefinedLabel { name } => write!(f, "undefined label \"{name}\""),
            EncodeError::DoesNotFit { text, bits } => {
                write!(f, "constant \"{text}\" does not fit into {bits} bits")
            }
        }
    }
}

/// A parsed instruction, holding its meaningful token children in source
/// order (punctuation is discarded during parsing)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionNode {
    /// `name src1, (reg|constant)[, dst]`
    Al(Vec<Token>),
    /// `name reg, (inner)` with inner one of `reg±num`, `reg`, `constant`
    Mem(Vec<Token>),
    /// `MOVE (register|constant), register`
    Move(Vec<Token>),
    /// `PUSH/POP reg`
    Stack(Vec<Token>),
    /// `JP/CALL [_cond] constant | (reg)`
    Jump(Vec<Token>),
    /// `JR [_cond] constant`
    Jr(Vec<Token>),
    /// `RET/RETI/RETN/HALT [_cond]`
    Ret(Vec<Token>),
    Org(Vec<Token>),
    Equ(Vec<Token>),
    Ds(Vec<Token>),
    /// `DB/DH/DW value {, value}`
    Data(Vec<Token>),
}

struct Production {
    build: fn(Vec<Token>) -> InstructionNode,
    rule: Rule,
}

/// Parse the lexemes of one line into an instruction node
///
/// The choice commits to the first production that matches; leftover
/// lexemes after a successful match are a syntax error.
pub fn parse_instruction(lexemes: &[String]) -> Result<InstructionNode, SyntaxError> {
    for production in PRODUCTIONS.iter() {
        if let Ok((tokens, rest)) = production.rule.parse(lexemes) {
            return if rest.is_empty() {
                Ok((production.build)(tokens))
            } else {
                Err(SyntaxError { lexeme: rest[0].clone() })
            };
        }
    }
    Err(SyntaxError { lexeme: lexemes.first().cloned().unwrap_or_default() })
}

impl InstructionNode {
    /// Whether the line occupies addresses and emits listing rows
    pub fn emits_code(&self) -> bool {
        !matches!(self, InstructionNode::Org(_) | InstructionNode::Equ(_) | InstructionNode::Ds(_))
    }

    /// The numeric operand of ORG, EQU or DS
    pub fn pseudo_value(&self) -> Result<i64, EncodeError> {
        match self {
            InstructionNode::Org(tokens)
            | InstructionNode::Equ(tokens)
            | InstructionNode::Ds(tokens) => numeric_value(&tokens[1]),
            _ => unreachable!("only layout pseudo-instructions carry a single value"),
        }
    }

    /// Bytes one DB/DH/DW element occupies
    pub fn data_size(&self) -> u32 {
        match self {
            InstructionNode::Data(tokens) => match tokens[0].text.as_str() {
                "DB" => 1,
                "DH" => 2,
                _ => 4,
            },
            _ => unreachable!("only data pseudo-instructions have an element size"),
        }
    }

    /// Number of DB/DH/DW elements
    pub fn data_count(&self) -> u32 {
        match self {
            InstructionNode::Data(tokens) => tokens.len() as u32 - 1,
            _ => unreachable!("only data pseudo-instructions have elements"),
        }
    }

    /// Encode the node into machine words; `address` is the word's own
    /// location (JR displacements are relative to it)
    pub fn encode(&self, symbols: &SymbolTable, address: u32) -> Result<Vec<u32>, EncodeError> {
        match self {
            InstructionNode::Al(tokens) => encode_al(tokens, symbols).map(|word| vec![word]),
            InstructionNode::Mem(tokens) => encode_mem(tokens, symbols).map(|word| vec![word]),
            InstructionNode::Move(tokens) => encode_move(tokens, symbols).map(|word| vec![word]),
            InstructionNode::Stack(tokens) => Ok(vec![encode_stack(tokens)]),
            InstructionNode::Jump(tokens) => encode_jump(tokens, symbols).map(|word| vec![word]),
            InstructionNode::Jr(tokens) => {
                encode_jr(tokens, symbols, address).map(|word| vec![word])
            }
            InstructionNode::Ret(tokens) => Ok(vec![encode_ret(tokens)]),
            InstructionNode::Org(_) | InstructionNode::Equ(_) | InstructionNode::Ds(_) => {
                Ok(Vec::new())
            }
            InstructionNode::Data(tokens) => encode_data(tokens),
        }
    }
}

// Token interpretation

fn numeric_value(token: &Token) -> Result<i64, EncodeError> {
    let (radix, text) = match token.kind {
        TokenKind::Binary => (2, strip_base_prefix(&token.text, "%B")),
        TokenKind::Octal => (8, strip_base_prefix(&token.text, "%O")),
        TokenKind::Decimal => (10, strip_base_prefix(&token.text, "%D")),
        TokenKind::Hexadecimal => {
            (16, strip_base_prefix(&token.text, "%H").trim_end_matches('H'))
        }
        _ => unreachable!("not a numeric token"),
    };
    i64::from_str_radix(text, radix)
        .map_err(|_| EncodeError::DoesNotFit { text: token.text.clone(), bits: 32 })
}

fn strip_base_prefix<'a>(text: &'a str, prefix: &str) -> &'a str {
    text.strip_prefix(prefix).map(str::trim_start).unwrap_or(text)
}

/// Resolve a constant (numeric or label) to its 32-bit value
fn constant_bits(token: &Token, symbols: &SymbolTable) -> Result<u32, EncodeError> {
    if token.kind == TokenKind::Label {
        symbols
            .get(&token.text)
            .copied()
            .ok_or_else(|| EncodeError::UndefinedLabel { name: token.text.clone() })
    } else {
        wrap32(numeric_value(token)?, &token.text)
    }
}

fn wrap32(value: i64, text: &str) -> Result<u32, EncodeError> {
    if !(-(1i64 << 31)..1i64 << 32).contains(&value) {
        return Err(EncodeError::DoesNotFit { text: text.to_string(), bits: 32 });
    }
    Ok(value as u32)
}

/// The 20-bit immediate field: a 32-bit value fits iff its top twelve bits
/// are uniform, so sign extension restores it exactly
fn fit20(bits: u32) -> Option<u32> {
    let top = bits >> 20;
    (top == 0 || top == 0xFFF).then_some(bits & 0xFFFFF)
}

fn immediate20(token: &Token, symbols: &SymbolTable) -> Result<u32, EncodeError> {
    let bits = constant_bits(token, symbols)?;
    fit20(bits).ok_or_else(|| EncodeError::DoesNotFit { text: token.text.clone(), bits: 20 })
}

fn register_code(token: &Token) -> u32 {
    match token.text.as_str() {
        "SP" => 0b111,
        "SR" => 0b000,
        name => (name.as_bytes()[1] - b'0') as u32,
    }
}

fn condition_code(token: &Token) -> u32 {
    match token.text.as_str() {
        "N" | "M" => 0b0001,
        "NN" | "P" => 0b0010,
        "C" | "ULT" => 0b0011,
        "NC" | "UGE" => 0b0100,
        "V" => 0b0101,
        "NV" => 0b0110,
        "Z" | "EQ" => 0b0111,
        "NZ" | "NE" => 0b1000,
        "ULE" => 0b1001,
        "UGT" => 0b1010,
        "SLT" => 0b1011,
        "SLE" => 0b1100,
        "SGE" => 0b1101,
        "SGT" => 0b1110,
        _ => unreachable!("the condition production admits no other name"),
    }
}

fn al_opcode(name: &str) -> u32 {
    match name {
        "OR" => 0b00001,
        "AND" => 0b00010,
        "XOR" => 0b00011,
        "ADD" => 0b00100,
        "ADC" => 0b00101,
        "SUB" => 0b00110,
        "SBC" => 0b00111,
        "ROTL" => 0b01000,
        "ROTR" => 0b01001,
        "SHL" => 0b01010,
        "SHR" => 0b01011,
        "ASHR" => 0b01100,
        _ => 0b01101, // CMP
    }
}

fn mem_opcode(name: &str) -> u32 {
    match name {
        "LOADB" => 0b10010,
        "STOREB" => 0b10011,
        "LOADH" => 0b10100,
        "STOREH" => 0b10101,
        "LOAD" => 0b10110,
        _ => 0b10111, // STORE
    }
}

// Encoders

/// The `fn` bit and 20-bit operand field for a register-or-constant operand
fn operand_field(token: &Token, symbols: &SymbolTable) -> Result<(u32, u32), EncodeError> {
    if token.kind == TokenKind::GeneralRegister {
        Ok((0, register_code(token) << 17))
    } else {
        Ok((1, immediate20(token, symbols)?))
    }
}

fn encode_al(tokens: &[Token], symbols: &SymbolTable) -> Result<u32, EncodeError> {
    let name = tokens[0].text.as_str();
    let opcode = al_opcode(name);
    let src1 = register_code(&tokens[1]);
    // CMP discards its result, so the destination field stays clear
    let dst = if name == "CMP" { 0 } else { tokens.get(3).map(register_code).unwrap_or(0) };
    let (immediate, operand) = operand_field(&tokens[2], symbols)?;
    Ok(opcode << 27 | immediate << 26 | dst << 23 | src1 << 20 | operand)
}

fn encode_mem(tokens: &[Token], symbols: &SymbolTable) -> Result<u32, EncodeError> {
    let opcode = mem_opcode(tokens[0].text.as_str());
    let rd = register_code(&tokens[1]);
    let (indexed, base, displacement) = match &tokens[2..] {
        [base, sign, offset] => {
            let mut value = numeric_value(offset)?;
            if sign.text == "-" {
                value = -value;
            }
            let bits = wrap32(value, &offset.text)?;
            let displacement = fit20(bits).ok_or_else(|| EncodeError::DoesNotFit {
                text: offset.text.clone(),
                bits: 20,
            })?;
            (1, register_code(base), displacement)
        }
        [operand] if operand.kind == TokenKind::GeneralRegister => {
            (1, register_code(operand), 0)
        }
        [operand] => (0, 0, immediate20(operand, symbols)?),
        _ => unreachable!("memory operand shapes are fixed by the grammar"),
    };
    Ok(opcode << 27 | indexed << 26 | rd << 23 | base << 20 | displacement)
}

fn encode_move(tokens: &[Token], symbols: &SymbolTable) -> Result<u32, EncodeError> {
    let source = &tokens[1];
    let destination = &tokens[2];
    let (dst, dst_sr) = if destination.kind == TokenKind::StatusRegister {
        (0, 1)
    } else {
        (register_code(destination), 0)
    };
    let (immediate, operand, src_sr) = match source.kind {
        TokenKind::StatusRegister => (0, 0, 1),
        TokenKind::GeneralRegister => (0, register_code(source) << 17, 0),
        _ => (1, immediate20(source, symbols)?, 0),
    };
    Ok(immediate << 26 | dst << 23 | src_sr << 21 | dst_sr << 20 | operand)
}

fn encode_stack(tokens: &[Token]) -> u32 {
    let opcode = if tokens[0].text == "PUSH" { 0b10001 } else { 0b10000 };
    opcode << 27 | register_code(&tokens[1]) << 23
}

/// An optional leading condition followed by the operand
fn split_condition(tokens: &[Token]) -> (u32, &Token) {
    if tokens[0].kind == TokenKind::Condition {
        (condition_code(&tokens[0]), &tokens[1])
    } else {
        (0, &tokens[0])
    }
}

fn encode_jump(tokens: &[Token], symbols: &SymbolTable) -> Result<u32, EncodeError> {
    let opcode = if tokens[0].text == "JP" { 0b11000 } else { 0b11001 };
    let (condition, target) = split_condition(&tokens[1..]);
    let (immediate, operand) = operand_field(target, symbols)?;
    Ok(opcode << 27 | immediate << 26 | condition << 22 | operand)
}

fn encode_jr(tokens: &[Token], symbols: &SymbolTable, address: u32) -> Result<u32, EncodeError> {
    let (condition, target) = split_condition(&tokens[1..]);
    // label targets become displacements relative to the following word;
    // numeric targets are the displacement itself
    let displacement = if target.kind == TokenKind::Label {
        constant_bits(target, symbols)? as i64 - (address as i64 + 4)
    } else {
        numeric_value(target)?
    };
    let bits = wrap32(displacement, &target.text)?;
    let displacement = fit20(bits)
        .ok_or_else(|| EncodeError::DoesNotFit { text: target.text.clone(), bits: 20 })?;
    Ok(0b11010 << 27 | 1 << 26 | condition << 22 | displacement)
}

fn encode_ret(tokens: &[Token]) -> u32 {
    let name = tokens[0].text.as_str();
    let opcode = if name == "HALT" { 0b11111 } else { 0b11011 };
    let return_type = match name {
        "RETI" => 0b01,
        "RETN" => 0b11,
        _ => 0b00,
    };
    let condition = tokens.get(1).map(condition_code).unwrap_or(0);
    opcode << 27 | condition << 22 | return_type
}

/// DB/DH/DW values packed little-endian; the last word is zero-padded at
/// its high end
fn encode_data(tokens: &[Token]) -> Result<Vec<u32>, EncodeError> {
    let element_bits = match tokens[0].text.as_str() {
        "DB" => 8,
        "DH" => 16,
        _ => 32,
    };
    let mut bytes = Vec::new();
    for token in &tokens[1..] {
        let vector = BitVector::from_signed(element_bits, numeric_value(token)?).ok_or_else(
            || EncodeError::DoesNotFit { text: token.text.clone(), bits: element_bits },
        )?;
        bytes.extend_from_slice(&vector.value().to_le_bytes()[..(element_bits / 8) as usize]);
    }
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    Ok(bytes.chunks(4).map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])).collect())
}

// Productions

static PRODUCTIONS: LazyLock<Vec<Production>> = LazyLock::new(|| {
    vec![
        Production { build: InstructionNode::Al, rule: al_rule() },
        Production { build: InstructionNode::Mem, rule: mem_rule() },
        Production { build: InstructionNode::Move, rule: move_rule() },
        Production { build: InstructionNode::Stack, rule: stack_rule() },
        Production { build: InstructionNode::Jump, rule: jump_rule() },
        Production { build: InstructionNode::Jr, rule: jr_rule() },
        Production { build: InstructionNode::Ret, rule: ret_rule() },
        Production { build: InstructionNode::Org, rule: pseudo_rule("ORG") },
        Production { build: InstructionNode::Equ, rule: pseudo_rule("EQU") },
        Production { build: InstructionNode::Ds, rule: pseudo_rule("DS") },
        Production { build: InstructionNode::Data, rule: data_rule() },
    ]
});

fn mnemonic(pattern: &str) -> Rule {
    Rule::token(TokenKind::Mnemonic, pattern)
}

fn punctuation(symbol: &str) -> Rule {
    Rule::Forgetable(Box::new(Rule::token(TokenKind::Punctuation, &regex::escape(symbol))))
}

fn numeric() -> Rule {
    Rule::Or(vec![
        Rule::token(TokenKind::Binary, "%B ?[+-]?[01]+"),
        Rule::token(TokenKind::Octal, "%O ?[+-]?[0-7]+"),
        Rule::token(TokenKind::Decimal, "(?:%D ?)?[+-]?[0-9]+"),
        Rule::token(TokenKind::Hexadecimal, "(?:%H ?)?[+-]?[0-9][0-9A-F]*H?"),
    ])
}

fn label() -> Rule {
    Rule::token(TokenKind::Label, "[A-Z_][A-Z0-9_]*")
}

fn constant() -> Rule {
    Rule::Or(vec![label(), numeric()])
}

fn general_register() -> Rule {
    Rule::token(TokenKind::GeneralRegister, "R[0-7]|SP")
}

fn register() -> Rule {
    Rule::Or(vec![general_register(), Rule::token(TokenKind::StatusRegister, "SR")])
}

fn condition_suffix() -> Rule {
    Rule::Optional(Box::new(Rule::Sequence(vec![
        punctuation("_"),
        Rule::token(
            TokenKind::Condition,
            "C|NC|Z|NZ|V|NV|N|NN|M|P|EQ|NE|UGT|UGE|ULE|ULT|SGT|SGE|SLE|SLT",
        ),
    ])))
}

fn al_rule() -> Rule {
    Rule::Sequence(vec![
        mnemonic("ADD|ADC|SUB|SBC|AND|OR|XOR|SHL|SHR|ASHR|ROTL|ROTR|CMP"),
        general_register(),
        punctuation(","),
        Rule::Or(vec![general_register(), constant()]),
        Rule::Optional(Box::new(Rule::Sequence(vec![punctuation(","), general_register()]))),
    ])
}

fn mem_rule() -> Rule {
    Rule::Sequence(vec![
        mnemonic("LOADB|LOADH|LOAD|STOREB|STOREH|STORE"),
        general_register(),
        punctuation(","),
        punctuation("("),
        Rule::Or(vec![
            Rule::Sequence(vec![
                general_register(),
                Rule::token(TokenKind::Sign, "[+-]"),
                numeric(),
            ]),
            general_register(),
            constant(),
        ]),
        punctuation(")"),
    ])
}

fn move_rule() -> Rule {
    Rule::Sequence(vec![
        mnemonic("MOVE"),
        Rule::Or(vec![register(), constant()]),
        punctuation(","),
        register(),
    ])
}

fn stack_rule() -> Rule {
    Rule::Sequence(vec![mnemonic("PUSH|POP"), general_register()])
}

fn jump_rule() -> Rule {
    Rule::Sequence(vec![
        mnemonic("JP|CALL"),
        condition_suffix(),
        Rule::Or(vec![
            constant(),
            Rule::Sequence(vec![punctuation("("), general_register(), punctuation(")")]),
        ]),
    ])
}

fn jr_rule() -> Rule {
    Rule::Sequence(vec![mnemonic("JR"), condition_suffix(), constant()])
}

fn ret_rule() -> Rule {
    Rule::Sequence(vec![mnemonic("RET|RETI|RETN|HALT"), condition_suffix()])
}

fn pseudo_rule(name: &str) -> Rule {
    Rule::Sequence(vec![mnemonic(&regex::escape(name)), numeric()])
}

fn data_rule() -> Rule {
    Rule::Sequence(vec![
        mnemonic("DB|DH|DW"),
        numeric(),
        Rule::Multiple(Box::new(Rule::Sequence(vec![punctuation(","), numeric()]))),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::lexer::preprocess;

    fn parse(line: &str) -> InstructionNode {
        let (_, lexemes) = preprocess(line).expect("line should lex");
        parse_instruction(&lexemes).expect("line should parse")
    }

    fn encode_one(line: &str, symbols: &SymbolTable) -> u32 {
        let words = parse(line).encode(symbols, 0).expect("line should encode");
        assert_eq!(words.len(), 1);
        words[0]
    }

    #[test]
    fn move_immediate_encodes_function_bit_and_destination() {
        let word = encode_one(" MOVE %D 5, R1", &SymbolTable::new());
        assert_eq!(word, 0b00000_1_001 << 23 | 5);
    }

    #[test]
    fn move_between_registers_uses_the_operand_register_field() {
        let word = encode_one(" MOVE R2, R3", &SymbolTable::new());
        assert_eq!(word, 0b00000_0_011 << 23 | 0b010 << 17);
    }

    #[test]
    fn move_to_and_from_the_status_register_sets_its_flags() {
        // source SR: flag at bit 10; destination SR: flag at bit 11
        let word = encode_one(" MOVE SR, R1", &SymbolTable::new());
        assert_eq!(word, 0b00000_0_001 << 23 | 1 << 21);
        let word = encode_one(" MOVE R1, SR", &SymbolTable::new());
        assert_eq!(word, 1 << 20 | 0b001 << 17);
        let word = encode_one(" MOVE 0, SR", &SymbolTable::new());
        assert_eq!(word, 1 << 26 | 1 << 20);
    }

    #[test]
    fn alu_three_register_form() {
        // ADD R1, R2, R3 computes R3 = R1 + R2
        let word = encode_one(" ADD R1, R2, R3", &SymbolTable::new());
        assert_eq!(word, 0b00100 << 27 | 0b011 << 23 | 0b001 << 20 | 0b010 << 17);
    }

    #[test]
    fn alu_immediate_form_sets_the_function_bit() {
        let word = encode_one(" SUB R1, 10, R2", &SymbolTable::new());
        assert_eq!(word, 0b00110 << 27 | 1 << 26 | 0b010 << 23 | 0b001 << 20 | 10);
    }

    #[test]
    fn alu_negative_immediates_sign_extend() {
        let word = encode_one(" ADD R1, -1, R2", &SymbolTable::new());
        assert_eq!(word & 0xFFFFF, 0xFFFFF);
    }

    #[test]
    fn cmp_keeps_the_destination_field_clear() {
        let word = encode_one(" CMP R1, R2", &SymbolTable::new());
        assert_eq!(word, 0b01101 << 27 | 0b001 << 20 | 0b010 << 17);
    }

    #[test]
    fn alu_labels_are_immediates() {
        let symbols = SymbolTable::from([("LIMIT".to_string(), 96u32)]);
        let word = encode_one(" CMP R1, LIMIT", &symbols);
        assert_eq!(word, 0b01101 << 27 | 1 << 26 | 0b001 << 20 | 96);
    }

    #[test]
    fn memory_absolute_indexed_and_register_forms() {
        let symbols = SymbolTable::from([("BUF".to_string(), 0x200u32)]);
        let word = encode_one(" LOAD R1, (BUF)", &symbols);
        assert_eq!(word, 0b10110 << 27 | 0b001 << 23 | 0x200);
        let word = encode_one(" STORE R1, (R2)", &symbols);
        assert_eq!(word, 0b10111 << 27 | 1 << 26 | 0b001 << 23 | 0b010 << 20);
        let word = encode_one(" LOADB R3, (R4+8)", &symbols);
        assert_eq!(word, 0b10010 << 27 | 1 << 26 | 0b011 << 23 | 0b100 << 20 | 8);
        let word = encode_one(" STOREH R3, (R4-2)", &symbols);
        assert_eq!(word, 0b10101 << 27 | 1 << 26 | 0b011 << 23 | 0b100 << 20 | 0xFFFFE);
    }

    #[test]
    fn stack_operations_encode_only_the_register() {
        let word = encode_one(" PUSH R5", &SymbolTable::new());
        assert_eq!(word, 0b10001 << 27 | 0b101 << 23);
        let word = encode_one(" POP SP", &SymbolTable::new());
        assert_eq!(word, 0b10000 << 27 | 0b111 << 23);
    }

    #[test]
    fn jumps_carry_conditions_and_targets() {
        let symbols = SymbolTable::from([("THERE".to_string(), 0x40u32)]);
        let word = encode_one(" JP THERE", &symbols);
        assert_eq!(word, 0b11000 << 27 | 1 << 26 | 0x40);
        let word = encode_one(" JP_EQ THERE", &symbols);
        assert_eq!(word, 0b11000 << 27 | 1 << 26 | 0b0111 << 22 | 0x40);
        let word = encode_one(" CALL (R3)", &symbols);
        assert_eq!(word, 0b11001 << 27 | 0b011 << 17);
    }

    #[test]
    fn jr_is_relative_to_the_following_word() {
        let symbols = SymbolTable::from([("BACK".to_string(), 0x10u32)]);
        let node = parse(" JR BACK");
        let word = node.encode(&symbols, 0x20).expect("should encode")[0];
        // 0x10 - (0x20 + 4) = -20
        assert_eq!(word, 0b11010 << 27 | 1 << 26 | (-20i32 as u32 & 0xFFFFF));
    }

    #[test]
    fn jr_displacement_overflow_is_an_error() {
        let symbols = SymbolTable::from([("FAR".to_string(), 0x0100_0000u32)]);
        let node = parse(" JR FAR");
        assert_eq!(
            node.encode(&symbols, 0),
            Err(EncodeError::DoesNotFit { text: "FAR".to_string(), bits: 20 })
        );
    }

    #[test]
    fn returns_differ_only_in_their_tail() {
        assert_eq!(encode_one(" RET", &SymbolTable::new()), 0b11011 << 27);
        assert_eq!(encode_one(" RETI", &SymbolTable::new()), 0b11011 << 27 | 0b01);
        assert_eq!(encode_one(" RETN", &SymbolTable::new()), 0b11011 << 27 | 0b11);
        assert_eq!(encode_one(" HALT", &SymbolTable::new()), 0b11111 << 27);
        assert_eq!(
            encode_one(" RET_NZ", &SymbolTable::new()),
            0b11011 << 27 | 0b1000 << 22
        );
    }

    #[test]
    fn numeric_bases_and_suffixes() {
        assert_eq!(encode_one(" MOVE %B 101, R1", &SymbolTable::new()) & 0xFFFFF, 5);
        assert_eq!(encode_one(" MOVE %O 17, R1", &SymbolTable::new()) & 0xFFFFF, 15);
        assert_eq!(encode_one(" MOVE 100, R1", &SymbolTable::new()) & 0xFFFFF, 100);
        assert_eq!(encode_one(" MOVE %H 1A, R1", &SymbolTable::new()) & 0xFFFFF, 26);
        assert_eq!(encode_one(" MOVE 42H, R1", &SymbolTable::new()) & 0xFFFFF, 0x42);
    }

    #[test]
    fn full_width_hex_immediates_pass_the_fit_test() {
        let word = encode_one(" MOVE 0FFFFFFFFH, R1", &SymbolTable::new());
        assert_eq!(word & 0xFFFFF, 0xFFFFF);
    }

    #[test]
    fn oversized_immediates_do_not_fit() {
        let node = parse(" MOVE 100000H, R1");
        assert_eq!(
            node.encode(&SymbolTable::new(), 0),
            Err(EncodeError::DoesNotFit { text: "100000H".to_string(), bits: 20 })
        );
    }

    #[test]
    fn undefined_labels_are_reported() {
        let node = parse(" JP NOWHERE");
        assert_eq!(
            node.encode(&SymbolTable::new(), 0),
            Err(EncodeError::UndefinedLabel { name: "NOWHERE".to_string() })
        );
    }

    #[test]
    fn data_packs_little_endian_and_pads_the_last_word() {
        let node = parse(" DW 0AABBCCDDH");
        assert_eq!(node.encode(&SymbolTable::new(), 0).unwrap(), vec![0xAABBCCDD]);

        let node = parse(" DB 1, 2, 3");
        assert_eq!(node.encode(&SymbolTable::new(), 0).unwrap(), vec![0x00030201]);

        let node = parse(" DB 1, 2, 3, 4, 5");
        assert_eq!(
            node.encode(&SymbolTable::new(), 0).unwrap(),
            vec![0x04030201, 0x00000005]
        );

        let node = parse(" DH 0FFFFH, -1");
        assert_eq!(node.encode(&SymbolTable::new(), 0).unwrap(), vec![0xFFFFFFFF]);
    }

    #[test]
    fn data_values_must_fit_their_element() {
        let node = parse(" DB 256");
        assert!(node.encode(&SymbolTable::new(), 0).is_err());
    }

    #[test]
    fn pseudo_instructions_expose_their_layout() {
        assert_eq!(parse(" ORG 100").pseudo_value().unwrap(), 100);
        assert_eq!(parse(" DS %H 10").pseudo_value().unwrap(), 16);
        assert!(!parse(" ORG 0").emits_code());
        assert!(parse(" DW 1").emits_code());
        let node = parse(" DH 1, 2, 3");
        assert_eq!(node.data_size() * node.data_count(), 6);
    }

    #[test]
    fn trailing_lexemes_are_syntax_errors() {
        let (_, lexemes) = preprocess(" PUSH R1, R2").unwrap();
        assert_eq!(parse_instruction(&lexemes), Err(SyntaxError { lexeme: ",".to_string() }));
    }

    #[test]
    fn unknown_mnemonics_are_syntax_errors() {
        let (_, lexemes) = preprocess(" FROB R1").unwrap();
        assert!(parse_instruction(&lexemes).is_err());
    }
}
