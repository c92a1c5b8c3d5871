//! Recursive-descent parser for the expression subset rendered by [`Expr`].
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := eq ( "&&" eq )*
//! eq      := rel ( ("==" | "!=" | "=?=" | "=!=" | IS | ISNT) rel )*
//! rel     := add ( ("<" | "<=" | ">" | ">=") add )*
//! add     := unary ( ("+" | "-") unary )*
//! unary   := ("!" | "-") unary | primary
//! primary := literal | ident | ident "(" ")" | "(" or ")"
//! ```

use crate::expr::{BinOp, Expr};
use crate::value::{unescape, Value};

/// Errors raised while parsing an expression
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected token {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        offset: usize,
        expected: &'static str,
    },

    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Real(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Int(i) => i.to_string(),
            Token::Real(r) => r.to_string(),
            Token::Str(s) => format!("\"{}\"", s),
            Token::Ident(s) => s.clone(),
            Token::Op(op) => format!("'{}'", op),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

/// Operators, longest first so that `=?=` wins over `==` and `<=` over `<`
const OPERATORS: &[&str] = &[
    "=?=", "=!=", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-",
];

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    'outer: while pos < bytes.len() {
        let c = bytes[pos] as char;

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if c == '(' {
            tokens.push((Token::LParen, pos));
            pos += 1;
            continue;
        }
        if c == ')' {
            tokens.push((Token::RParen, pos));
            pos += 1;
            continue;
        }

        if c == '"' {
            let start = pos;
            pos += 1;
            let mut raw = String::new();
            loop {
                match input[pos..].chars().next() {
                    None => return Err(ParseError::UnterminatedString(start)),
                    Some('\\') => {
                        raw.push('\\');
                        pos += 1;
                        if let Some(next) = input[pos..].chars().next() {
                            raw.push(next);
                            pos += next.len_utf8();
                        }
                    }
                    Some('"') => {
                        pos += 1;
                        break;
                    }
                    Some(other) => {
                        raw.push(other);
                        pos += other.len_utf8();
                    }
                }
            }
            tokens.push((Token::Str(unescape(&raw)), start));
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && bytes.get(pos + 1).is_some_and(|b| b.is_ascii_digit())) {
            let start = pos;
            while pos < bytes.len()
                && (bytes[pos].is_ascii_digit()
                    || bytes[pos] == b'.'
                    || bytes[pos] == b'e'
                    || bytes[pos] == b'E')
            {
                pos += 1;
            }
            let text = &input[start..pos];
            let token = if text.contains(['.', 'e', 'E']) {
                text.parse::<f64>()
                    .map(Token::Real)
                    .map_err(|_| ParseError::InvalidNumber(text.to_string()))?
            } else {
                text.parse::<i64>()
                    .map(Token::Int)
                    .map_err(|_| ParseError::InvalidNumber(text.to_string()))?
            };
            tokens.push((token, start));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'.') {
                pos += 1;
            }
            tokens.push((Token::Ident(input[start..pos].to_string()), start));
            continue;
        }

        for op in OPERATORS {
            if input[pos..].starts_with(op) {
                tokens.push((Token::Op(op), pos));
                pos += op.len();
                continue 'outer;
            }
        }

        let ch = input[pos..].chars().next().unwrap_or(c);
        return Err(ParseError::UnexpectedChar { ch, offset: pos });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, wanted: Token, expected: &'static str) -> Result<(), ParseError> {
        match self.advance() {
            Some((token, _)) if token == wanted => Ok(()),
            Some((token, offset)) => Err(ParseError::UnexpectedToken {
                found: token.describe(),
                offset,
                expected,
            }),
            None => Err(ParseError::UnexpectedEnd(expected)),
        }
    }

    /// Match the next token against a set of binary operators at one precedence level
    fn binary_op(&self, level: u8) -> Option<BinOp> {
        let op = match self.peek()? {
            Token::Op("||") => BinOp::Or,
            Token::Op("&&") => BinOp::And,
            Token::Op("==") => BinOp::Eq,
            Token::Op("!=") => BinOp::Ne,
            Token::Op("=?=") => BinOp::MetaEq,
            Token::Op("=!=") => BinOp::MetaNe,
            Token::Op("<") => BinOp::Lt,
            Token::Op("<=") => BinOp::Le,
            Token::Op(">") => BinOp::Gt,
            Token::Op(">=") => BinOp::Ge,
            Token::Op("+") => BinOp::Add,
            Token::Op("-") => BinOp::Sub,
            Token::Ident(word) if word.eq_ignore_ascii_case("is") => BinOp::MetaEq,
            Token::Ident(word) if word.eq_ignore_ascii_case("isnt") => BinOp::MetaNe,
            _ => return None,
        };
        (op.precedence() == level).then_some(op)
    }

    fn parse_level(&mut self, level: u8) -> Result<Expr, ParseError> {
        if level > 5 {
            return self.parse_unary();
        }
        let mut lhs = self.parse_level(level + 1)?;
        while let Some(op) = self.binary_op(level) {
            self.advance();
            let rhs = self.parse_level(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::Op("-")) => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(match inner {
                    Expr::Lit(Value::Int(i)) => Expr::Lit(Value::Int(-i)),
                    Expr::Lit(Value::Real(r)) => Expr::Lit(Value::Real(-r)),
                    other => Expr::Neg(Box::new(other)),
                })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        const EXPECTED: &str = "a literal, attribute or '('";
        let (token, offset) = self
            .advance()
            .ok_or(ParseError::UnexpectedEnd(EXPECTED))?;

        match token {
            Token::Int(i) => Ok(Expr::Lit(Value::Int(i))),
            Token::Real(r) => Ok(Expr::Lit(Value::Real(r))),
            Token::Str(s) => Ok(Expr::Lit(Value::Str(s))),
            Token::LParen => {
                let inner = self.parse_level(1)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    self.expect(Token::RParen, "')'")?;
                    return if name.eq_ignore_ascii_case("time") {
                        Ok(Expr::Time)
                    } else {
                        Err(ParseError::UnknownFunction(name))
                    };
                }
                Ok(match name.to_ascii_lowercase().as_str() {
                    "true" => Expr::Lit(Value::Bool(true)),
                    "false" => Expr::Lit(Value::Bool(false)),
                    "undefined" => Expr::Lit(Value::Undefined),
                    "error" => Expr::Lit(Value::Error),
                    _ => Expr::Attr(name),
                })
            }
            other => Err(ParseError::UnexpectedToken {
                found: other.describe(),
                offset,
                expected: EXPECTED,
            }),
        }
    }
}

/// Parse an expression from its textual form
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_level(1)?;

    if let Some((token, offset)) = parser.advance() {
        return Err(ParseError::UnexpectedToken {
            found: token.describe(),
            offset,
            expected: "end of expression",
        });
    }

    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_precedence() {
        let e = parse("A && B || C").unwrap();
        assert_eq!(e, Expr::attr("A").and(Expr::attr("B")).or(Expr::attr("C")));

        let e = parse("a - b < 5").unwrap();
        assert_eq!(
            e,
            Expr::attr("a").minus(Expr::attr("b")).less_than(Expr::int(5))
        );
    }

    #[test]
    fn test_parse_meta_keywords() {
        let e = parse("RETRIEVED IS false").unwrap();
        assert_eq!(e, Expr::attr("RETRIEVED").is(Expr::boolean(false)));

        let e = parse("x isnt UNDEFINED").unwrap();
        assert_eq!(e, Expr::attr("x").is_not(Expr::undefined()));
    }

    #[test]
    fn test_parse_time_and_strings() {
        let e = parse("time() - QDate > 10 && Owner == \"a\\\"b\"").unwrap();
        let expected = Expr::time()
            .minus(Expr::attr("QDate"))
            .greater_than(Expr::int(10))
            .and(Expr::attr("Owner").equals(Expr::string("a\"b")));
        assert_eq!(e, expected);
    }

    #[test]
    fn test_parse_negative_literal_folds() {
        assert_eq!(parse("-3").unwrap(), Expr::int(-3));
        assert_eq!(parse("-x").unwrap(), Expr::Neg(Box::new(Expr::attr("x"))));
    }

    #[test]
    fn test_render_parse_round_trip() {
        let exprs = [
            "JobStatus == 4 && (CompletionDate =?= UNDEFINED || CompletionDate == 0 || time() - CompletionDate < 259200) || RETRIEVED",
            "ClusterId == 12 && RETRIEVED =!= true && RetrievalClaim =?= UNDEFINED",
            "!(a || b) && c >= 2.5",
        ];
        for text in exprs {
            let parsed = parse(text).unwrap();
            assert_eq!(parsed.to_string(), text);
            assert_eq!(parse(&parsed.to_string()).unwrap(), parsed);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("a ==").unwrap_err(), ParseError::UnexpectedEnd(_)));
        assert!(matches!(parse("(a").unwrap_err(), ParseError::UnexpectedEnd(_)));
        assert!(matches!(parse("\"open").unwrap_err(), ParseError::UnterminatedString(0)));
        assert!(matches!(parse("a b").unwrap_err(), ParseError::UnexpectedToken { .. }));
        assert!(matches!(parse("size()").unwrap_err(), ParseError::UnknownFunction(_)));
        assert!(matches!(parse("a # b").unwrap_err(), ParseError::UnexpectedChar { ch: '#', .. }));
    }
}
