//! Lexer for the restricted tool language.
//!
//! Words associated with capability escape (`import`, `exec`, ...) lex to a
//! dedicated token so the compiler can reject them with a capability
//! violation instead of a generic syntax error.

use crate::error::SandboxError;

/// Words that are rejected outright, whatever the surrounding syntax.
pub const FORBIDDEN_WORDS: &[&str] = &["import", "include", "require", "eval", "exec", "system"];

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),

    // Keywords
    Let,
    Fn,
    Return,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    True,
    False,
    Null,

    /// A reserved word with no safe meaning in this language.
    Forbidden(&'static str),

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
}

/// A token with the source line it started on, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, SandboxError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1usize;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                // Comment to end of line.
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some('\\') => value.push('\\'),
                            Some('"') => value.push('"'),
                            Some(other) => {
                                return Err(syntax_error(
                                    line,
                                    format!("unknown escape '\\{other}'"),
                                ))
                            }
                            None => return Err(syntax_error(line, "unterminated string")),
                        },
                        Some('\n') | None => {
                            return Err(syntax_error(line, "unterminated string"))
                        }
                        Some(other) => value.push(other),
                    }
                }
                tokens.push(SpannedToken {
                    token: Token::Str(value),
                    line,
                });
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        chars.next();
                    } else if c == '.' && !is_float {
                        is_float = true;
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = if is_float {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| syntax_error(line, format!("invalid number '{text}'")))?;
                    Token::Float(value)
                } else {
                    let value: i64 = text
                        .parse()
                        .map_err(|_| syntax_error(line, format!("integer out of range '{text}'")))?;
                    Token::Int(value)
                };
                tokens.push(SpannedToken { token, line });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(SpannedToken {
                    token: keyword_or_ident(word),
                    line,
                });
            }
            _ => {
                chars.next();
                let token = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    ';' => Token::Semicolon,
                    ':' => Token::Colon,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::Eq
                        } else {
                            Token::Assign
                        }
                    }
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::NotEq
                        } else {
                            Token::Bang
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::LtEq
                        } else {
                            Token::Lt
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            Token::GtEq
                        } else {
                            Token::Gt
                        }
                    }
                    '&' => {
                        if chars.peek() == Some(&'&') {
                            chars.next();
                            Token::AndAnd
                        } else {
                            return Err(syntax_error(line, "single '&' is not an operator"));
                        }
                    }
                    '|' => {
                        if chars.peek() == Some(&'|') {
                            chars.next();
                            Token::OrOr
                        } else {
                            return Err(syntax_error(line, "single '|' is not an operator"));
                        }
                    }
                    other => {
                        return Err(syntax_error(line, format!("unexpected character '{other}'")))
                    }
                };
                tokens.push(SpannedToken { token, line });
            }
        }
    }

    Ok(tokens)
}

fn keyword_or_ident(word: String) -> Token {
    if let Some(&forbidden) = FORBIDDEN_WORDS.iter().find(|&&w| w == word) {
        return Token::Forbidden(forbidden);
    }
    match word.as_str() {
        "let" => Token::Let,
        "fn" => Token::Fn,
        "return" => Token::Return,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "for" => Token::For,
        "in" => Token::In,
        "break" => Token::Break,
        "continue" => Token::Continue,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => Token::Ident(word),
    }
}

fn syntax_error(line: usize, message: impl std::fmt::Display) -> SandboxError {
    SandboxError::Compile(format!("line {line}: {message}"))
}
