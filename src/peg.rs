//! A tiny PEG-style combinator engine over lexed tokens
//!
//! Rules consume a slice of lexemes and produce the flat list of tokens they
//! matched plus the unconsumed remainder. Ordered choice commits to the
//! first alternative that succeeds; there is no backtracking across it.

use regex::Regex;

/// A parse failure, tagged with the offending lexeme (empty at end of input)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub lexeme: String,
}

/// What kind of lexeme a terminal matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Binary,
    Octal,
    Decimal,
    Hexadecimal,
    Label,
    GeneralRegister,
    StatusRegister,
    Condition,
    Sign,
    Mnemonic,
    Punctuation,
}

/// A matched lexeme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

/// A parsing rule built from the engine's combinators
pub enum Rule {
    /// Match a single lexeme against an anchored regular expression
    Token(TokenKind, Regex),
    /// Ordered choice: first alternative to succeed wins
    Or(Vec<Rule>),
    /// All items in order
    Sequence(Vec<Rule>),
    /// Match the item or consume nothing
    Optional(Box<Rule>),
    /// Greedy zero-or-more repetitions of the item
    Multiple(Box<Rule>),
    /// Match the item but discard what it produced
    Forgetable(Box<Rule>),
}

impl Rule {
    /// A terminal rule; `pattern` must match the whole lexeme
    pub fn token(kind: TokenKind, pattern: &str) -> Rule {
        Rule::Token(kind, Regex::new(&format!("^(?:{pattern})$")).unwrap())
    }

    /// Try to match the front of `lexemes`, returning the matched tokens
    /// and the unconsumed tail
    pub fn parse<'a>(&self, lexemes: &'a [String]) -> Result<(Vec<Token>, &'a [String]), SyntaxError> {
        match self {
            Rule::Token(kind, pattern) => {
                let lexeme = lexemes.first().ok_or_else(|| SyntaxError { lexeme: String::new() })?;
                if pattern.is_match(lexeme) {
                    let token = Token { kind: *kind, text: lexeme.clone() };
                    Ok((vec![token], &lexemes[1..]))
                } else {
                    Err(SyntaxError { lexeme: lexeme.clone() })
                }
            }
            Rule::Or(alternatives) => {
                for alternative in alternatives {
                    if let Ok(matched) = alternative.parse(lexemes) {
                        return Ok(matched);
                    }
                }
                Err(SyntaxError { lexeme: lexemes.first().cloned().unwrap_or_default() })
            }
            Rule::Sequence(items) => {
                let mut matched = Vec::new();
                let mut remainder = lexemes;
                for item in items {
                    let (tokens, rest) = item.parse(remainder)?;
                    matched.extend(tokens);
                    remainder = rest;
                }
                Ok((matched, remainder))
            }
            Rule::Optional(item) => Ok(item.parse(lexemes).unwrap_or((Vec::new(), lexemes))),
            Rule::Multiple(item) => {
                let mut matched = Vec::new();
                let mut remainder = lexemes;
                while let Ok((tokens, rest)) = item.parse(remainder) {
                    matched.extend(tokens);
                    remainder = rest;
                }
                Ok((matched, remainder))
            }
            Rule::Forgetable(item) => {
                let (_, remainder) = item.parse(lexemes)?;
                Ok((Vec::new(), remainder))
            }
        }
    }
}
