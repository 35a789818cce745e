//! Splits one physical source line into a label and instruction lexemes

/// Mnemonics that may carry a `_CONDITION` suffix; longer names first so
/// RETI/RETN are not mistaken for RET
const CONDITIONAL_MNEMONICS: [&str; 7] = ["CALL", "RETI", "RETN", "RET", "HALT", "JP", "JR"];

/// Lex one line into `(label, lexemes)`, or `None` when nothing remains
/// after the comment is stripped
///
/// The line is uppercased, cut at the first `;`, and the label is whatever
/// precedes the first whitespace when column 0 is not blank. The remainder
/// splits on whitespace and on `,` `(` `)`; `+` and `-` split off only when
/// they are not the first character of a lexeme, so signed literals stay
/// whole while `(R1-4)` comes apart. A lone `%B`/`%O`/`%D`/`%H` base prefix
/// is re-merged with the literal that follows it.
pub fn preprocess(line: &str) -> Option<(String, Vec<String>)> {
    let uppercased = line.to_uppercase();
    let code = uppercased.split(';').next().unwrap_or("");
    if code.is_empty() {
        return None;
    }

    let (label, instruction_part) = match code.chars().next() {
        Some(first) if !first.is_whitespace() => match code.split_once(char::is_whitespace) {
            Some((label, rest)) => (label.to_string(), rest),
            None => (code.to_string(), ""),
        },
        _ => (String::new(), code),
    };

    Some((label, split_on_tokens(instruction_part)))
}

fn split_on_tokens(text: &str) -> Vec<String> {
    let mut lexemes: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let mut current = String::new();
        for character in word.chars() {
            match character {
                ',' | '(' | ')' => {
                    if !current.is_empty() {
                        lexemes.push(std::mem::take(&mut current));
                    }
                    lexemes.push(character.to_string());
                }
                '+' | '-' if !current.is_empty() => {
                    lexemes.push(std::mem::take(&mut current));
                    lexemes.push(character.to_string());
                }
                _ => current.push(character),
            }
        }
        if !current.is_empty() {
            lexemes.push(current);
        }
    }
    merge_base_prefixes(split_condition_suffix(lexemes))
}

/// Split `JP_EQ`-style mnemonics into `JP`, `_`, `EQ`; only the mnemonic
/// position is affected, so labels keep their underscores
fn split_condition_suffix(mut lexemes: Vec<String>) -> Vec<String> {
    let Some(first) = lexemes.first().cloned() else {
        return lexemes;
    };
    for mnemonic in CONDITIONAL_MNEMONICS {
        if let Some(suffix) = first.strip_prefix(mnemonic).and_then(|rest| rest.strip_prefix('_')) {
            let mut split = vec![mnemonic.to_string(), "_".to_string()];
            if !suffix.is_empty() {
                split.push(suffix.to_string());
            }
            split.extend(lexemes.drain(1..));
            return split;
        }
    }
    lexemes
}

fn merge_base_prefixes(lexemes: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;
    for lexeme in lexemes {
        match pending.take() {
            Some(prefix) => merged.push(format!("{prefix} {lexeme}")),
            None if matches!(lexeme.as_str(), "%B" | "%O" | "%D" | "%H") => pending = Some(lexeme),
            None => merged.push(lexeme),
        }
    }
    if let Some(prefix) = pending {
        merged.push(prefix);
    }
    merged
}
