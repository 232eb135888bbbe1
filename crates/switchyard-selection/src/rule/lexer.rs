//! Tokenizer for rule expressions

use crate::error::ParseError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    In,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Question,
    Colon,
    OrOr,
    AndAnd,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{s}'"),
            Token::Int(i) => format!("integer {i}"),
            Token::Float(f) => format!("number {f}"),
            Token::Str(s) => format!("string {s:?}"),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            Token::In => "in",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Question => "?",
            Token::Colon => ":",
            Token::OrOr => "||",
            Token::AndAnd => "&&",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Bang => "!",
            Token::Ident(_) | Token::Int(_) | Token::Float(_) | Token::Str(_) => "",
        }
    }
}

/// A token and the byte offset it starts at
pub(crate) type Spanned = (Token, usize);

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ParseError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let word = &src[start..i];
            let tok = match word {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "in" => Token::In,
                _ => Token::Ident(word.to_string()),
            };
            tokens.push((tok, start));
            continue;
        }

        if c.is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let is_float = i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let text = &src[start..i];
                let f = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::syntax(start, format!("invalid number '{text}'")))?;
                tokens.push((Token::Float(f), start));
            } else {
                let text = &src[start..i];
                let n = text.parse::<i64>().map_err(|_| {
                    ParseError::syntax(start, format!("integer '{text}' out of range"))
                })?;
                tokens.push((Token::Int(n), start));
            }
            continue;
        }

        if c == b'"' || c == b'\'' {
            let (s, end) = lex_string(src, start)?;
            tokens.push((Token::Str(s), start));
            i = end;
            continue;
        }

        let two = bytes.get(i + 1).copied();
        let (tok, len) = match (c, two) {
            (b'|', Some(b'|')) => (Token::OrOr, 2),
            (b'&', Some(b'&')) => (Token::AndAnd, 2),
            (b'=', Some(b'=')) => (Token::EqEq, 2),
            (b'!', Some(b'=')) => (Token::NotEq, 2),
            (b'<', Some(b'=')) => (Token::Le, 2),
            (b'>', Some(b'=')) => (Token::Ge, 2),
            (b'<', _) => (Token::Lt, 1),
            (b'>', _) => (Token::Gt, 1),
            (b'!', _) => (Token::Bang, 1),
            (b'.', _) => (Token::Dot, 1),
            (b',', _) => (Token::Comma, 1),
            (b'(', _) => (Token::LParen, 1),
            (b')', _) => (Token::RParen, 1),
            (b'[', _) => (Token::LBracket, 1),
            (b']', _) => (Token::RBracket, 1),
            (b'?', _) => (Token::Question, 1),
            (b':', _) => (Token::Colon, 1),
            (b'+', _) => (Token::Plus, 1),
            (b'-', _) => (Token::Minus, 1),
            (b'*', _) => (Token::Star, 1),
            (b'/', _) => (Token::Slash, 1),
            (b'%', _) => (Token::Percent, 1),
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return Err(ParseError::syntax(start, format!("unexpected character '{ch}'")));
            }
        };
        tokens.push((tok, start));
        i += len;
    }

    Ok(tokens)
}

/// Lex a quoted string starting at `start`; returns the value and the offset
/// just past the closing quote.
fn lex_string(src: &str, start: usize) -> Result<(String, usize), ParseError> {
    let mut chars = src[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(ParseError::syntax(start, "expected string"));
    };
    let mut out = String::new();

    while let Some((off, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + off + c.len_utf8())),
            '\\' => {
                let Some((esc_off, esc)) = chars.next() else {
                    break;
                };
                let decoded = match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    other => {
                        return Err(ParseError::syntax(
                            start + esc_off,
                            format!("unknown escape '\\{other}'"),
                        ))
                    }
                };
                out.push(decoded);
            }
            c => out.push(c),
        }
    }

    Err(ParseError::syntax(start, "unterminated string"))
}
