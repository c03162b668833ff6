//! Tokenizer with Python-style indentation.

use crate::error::{Exception, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Kw(&'static str),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

const KEYWORDS: [&str; 29] = [
    "and", "as", "assert", "break", "class", "continue", "def", "del", "elif", "else", "except",
    "False", "finally", "for", "from", "if", "import", "in", "is", "lambda", "None", "not", "or",
    "pass", "raise", "return", "True", "try", "while",
];

// Longest first, so the first match wins.
const OPERATORS: [&str; 34] = [
    "**=", "//=", "==", "!=", "<=", ">=", "**", "//", "+=", "-=", "*=", "/=", "%=", "->", "(",
    ")", "[", "]", "{", "}", ",", ":", ".", ";", "+", "-", "*", "/", "%", "<", ">", "=", "~",
    "@",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
        at_line_start: true,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
    at_line_start: bool,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn error(&self, message: impl Into<String>) -> Exception {
        Exception::syntax(self.line, message)
    }

    fn run(&mut self) -> Result<()> {
        loop {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                if !self.indentation()? {
                    continue;
                }
            }
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    if self.depth == 0 && self.tokens.last().is_some_and(|t| t.tok != Tok::Newline)
                    {
                        self.push(Tok::Newline);
                    }
                    self.pos += 1;
                    self.line += 1;
                    self.at_line_start = self.depth == 0;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' => {
                    self.pos += 1;
                    if self.peek() == Some('\r') {
                        self.pos += 1;
                    }
                    if self.bump() != Some('\n') {
                        return Err(
                            self.error("unexpected character after line continuation character")
                        );
                    }
                    self.line += 1;
                }
                '\'' | '"' => self.string(false, false)?,
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) =>
                {
                    self.number()?
                }
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.operator()?,
            }
        }

        if self.tokens.last().is_some_and(|t| t.tok != Tok::Newline) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measure a line's indentation and emit INDENT/DEDENT. Returns false for
    /// blank and comment-only lines, which are skipped.
    fn indentation(&mut self) -> Result<bool> {
        let mut col = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => col += 1,
                '\t' => col = (col / 8 + 1) * 8,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek() {
            None => return Ok(false),
            Some('#') => {
                self.skip_comment();
                self.skip_newline();
                return Ok(false);
            }
            Some('\n') => {
                self.skip_newline();
                return Ok(false);
            }
            _ => {}
        }

        let current = self.indents.last().copied().unwrap_or(0);
        if col > current {
            self.indents.push(col);
            self.push(Tok::Indent);
        } else if col < current {
            while self.indents.last().is_some_and(|&i| col < i) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if self.indents.last() != Some(&col) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while self.peek().is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn skip_newline(&mut self) {
        if self.peek() == Some('\n') {
            self.pos += 1;
            self.line += 1;
        }
        self.at_line_start = true;
    }

    fn word(&mut self) -> Result<()> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('\'' | '"')) {
            let lower = word.to_ascii_lowercase();
            match lower.as_str() {
                "r" => return self.string(true, false),
                "f" => return self.string(false, true),
                "rf" | "fr" => return self.string(true, true),
                "b" | "rb" | "br" | "u" => {
                    return Err(self.error(format!("unsupported string prefix '{word}'")));
                }
                _ => {}
            }
        }

        if let Some(&kw) = KEYWORDS.iter().find(|k| **k == word) {
            self.push(Tok::Kw(kw));
        } else {
            self.push(Tok::Name(word));
        }
        Ok(())
    }

    fn number(&mut self) -> Result<()> {
        let start = self.pos;
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                    self.pos += 1;
                }
                let digits: String = self.chars[digits_start..self.pos]
                    .iter()
                    .filter(|c| **c != '_')
                    .collect();
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| self.error("invalid integer literal"))?;
                self.push(Tok::Int(value));
                return Ok(());
            }
        }

        let mut is_float = false;
        self.digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            self.digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += digit_at;
                self.digits();
            }
        }
        if self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            return Err(self.error("invalid decimal literal"));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| self.error("invalid float literal"))?;
            self.push(Tok::Float(value));
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| self.error("integer literal is too large"))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
    }

    fn string(&mut self, raw: bool, formatted: bool) -> Result<()> {
        let start_line = self.line;
        let Some(quote) = self.bump() else {
            return Err(self.error("unterminated string literal"));
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let unterminated = || Exception::syntax(start_line, "unterminated string literal");
        let mut body = String::new();
        loop {
            let c = self.bump().ok_or_else(unterminated)?;
            match c {
                c if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                        self.pos += 2;
                        break;
                    }
                    body.push(c);
                }
                '\n' => {
                    if !triple {
                        return Err(unterminated());
                    }
                    self.line += 1;
                    body.push(c);
                }
                '\\' => {
                    let next = self.bump().ok_or_else(unterminated)?;
                    if next == '\n' {
                        self.line += 1;
                    }
                    if raw {
                        body.push('\\');
                        body.push(next);
                    } else {
                        self.escape(next, &mut body)?;
                    }
                }
                c => body.push(c),
            }
        }

        if formatted {
            self.push(Tok::FStr(body));
        } else {
            self.push(Tok::Str(body));
        }
        Ok(())
    }

    fn escape(&mut self, c: char, out: &mut String) -> Result<()> {
        match c {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' => out.push(c),
            'x' | 'u' | 'U' => {
                let len = match c {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let hex: String = (0..len).filter_map(|_| self.bump()).collect();
                let ch = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == len)
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(format!("invalid \\{c} escape")))?;
                out.push(ch);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn operator(&mut self) -> Result<()> {
        let rest = &self.chars[self.pos..];
        let op = OPERATORS.iter().find(|op| {
            op.chars().count() <= rest.len() && op.chars().zip(rest).all(|(a, b)| a == *b)
        });
        let Some(&op) = op else {
            let c = rest.first().copied().unwrap_or(' ');
            return Err(self.error(format!("invalid character '{c}'")));
        };
        match op {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.pos += op.len();
        self.push(Tok::Op(op));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn indentation_produces_blocks() {
        let t = toks("if x:\n    y = 1\nz\n");
        assert_eq!(
            t,
            vec![
                Tok::Kw("if"),
                Tok::Name("x".into()),
                Tok::Op(":"),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let t = toks("x = [1,\n  2]\n");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let t = toks("x = 1\n\n   # note\ny = 2");
        assert!(!t.contains(&Tok::Indent));
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("1_000")[0], Tok::Int(1000));
        assert_eq!(toks("0xff")[0], Tok::Int(255));
        assert_eq!(toks("2.5e3")[0], Tok::Float(2500.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
        assert!(tokenize("99999999999999999999").is_err());
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(toks(r#""a\tb""#)[0], Tok::Str("a\tb".into()));
        assert_eq!(toks(r#"r"a\tb""#)[0], Tok::Str("a\\tb".into()));
        assert_eq!(toks("f'{x}'")[0], Tok::FStr("{x}".into()));
        assert_eq!(toks("'''a\nb'''")[0], Tok::Str("a\nb".into()));
    }

    #[test]
    fn keywords_are_recognized() {
        assert_eq!(toks("while")[0], Tok::Kw("while"));
        assert_eq!(toks("None")[0], Tok::Kw("None"));
        assert_eq!(toks("nonkeyword")[0], Tok::Name("nonkeyword".into()));
    }

    #[test]
    fn bad_dedent_is_an_error() {
        let err = tokenize("if x:\n    y\n  z\n").unwrap_err();
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize("x = 'abc\n").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }
}
