//! Recursive-descent parser for rule expressions
//!
//! Precedence, lowest first: `?:`, `||`, `&&`, `== !=`, `< <= > >= in`,
//! `+ -`, `* / %`, unary `! -`, then postfix member access, indexing and
//! method calls.

use serde_json::Value;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::{MAX_DEPTH, MAX_SOURCE_LEN};
use crate::error::ParseError;

pub(crate) fn parse(src: &str) -> Result<Expr, ParseError> {
    if src.len() > MAX_SOURCE_LEN {
        return Err(ParseError::TooLong {
            len: src.len(),
            limit: MAX_SOURCE_LEN,
        });
    }
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        end: src.len(),
    };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ParseError::syntax(
            parser.offset(),
            format!("unexpected {} after expression", tok.describe()),
        )),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        if self.eat(&expected) {
            return Ok(());
        }
        let found = self
            .peek()
            .map(Token::describe)
            .unwrap_or_else(|| "end of input".to_string());
        Err(ParseError::syntax(
            self.offset(),
            format!("expected {what}, found {found}"),
        ))
    }

    fn nest(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(())
    }

    /// Each operator or postfix link wraps everything parsed so far in a
    /// new node, so it counts as one nesting level.
    fn link(&mut self, links: &mut usize) -> Result<(), ParseError> {
        self.nest()?;
        *links += 1;
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.nest()?;
        let expr = self.ternary();
        self.depth -= 1;
        expr
    }

    fn ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect(Token::Colon, "':' in conditional")?;
        let otherwise = self.expression()?;
        Ok(Expr::Ternary(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and()?;
        let mut links = 0;
        while self.eat(&Token::OrOr) {
            self.link(&mut links)?;
            let right = self.and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.equality()?;
        let mut links = 0;
        while self.eat(&Token::AndAnd) {
            self.link(&mut links)?;
            let right = self.equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.relation()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let right = self.relation()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn relation(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.additive()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            self.link(&mut links)?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth -= links;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.nest()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        let mut links = 0;
        loop {
            if self.eat(&Token::Dot) {
                self.link(&mut links)?;
                let name = self.ident("field or method name after '.'")?;
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    expr = Expr::Method(Box::new(expr), name, args);
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if self.eat(&Token::LBracket) {
                self.link(&mut links)?;
                let index = self.expression()?;
                self.expect(Token::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }
        self.depth -= links;
        Ok(expr)
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => {
                let found = self
                    .peek()
                    .map(Token::describe)
                    .unwrap_or_else(|| "end of input".to_string());
                Err(ParseError::syntax(
                    self.offset(),
                    format!("expected {what}, found {found}"),
                ))
            }
        }
    }

    /// Comma-separated arguments after an opening `(`, through the `)`
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.delimited(Token::RParen, "')'")
    }

    fn delimited(&mut self, close: Token, what: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(close.clone(), &format!("',' or {what}"))?;
            return Ok(items);
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        let Some(tok) = self.advance() else {
            return Err(ParseError::syntax(offset, "unexpected end of input"));
        };
        match tok {
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Int(n) => Ok(Expr::Literal(Value::from(n))),
            Token::Float(f) => serde_json::Number::from_f64(f)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| ParseError::syntax(offset, "number is not finite")),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.nest()?;
                let items = self.delimited(Token::RBracket, "']'");
                self.depth -= 1;
                Ok(Expr::List(items?))
            }
            other => Err(ParseError::syntax(
                offset,
                format!("unexpected {}", other.describe()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Var(name.to_string()))
    }

    fn lit(v: impl Into<Value>) -> Box<Expr> {
        Box::new(Expr::Literal(v.into()))
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(
            parse("a || b && c").expect("parse"),
            Expr::Binary(
                BinaryOp::Or,
                var("a"),
                Box::new(Expr::Binary(BinaryOp::And, var("b"), var("c")))
            )
        );
    }

    #[test]
    fn arithmetic_precedence_and_left_associativity() {
        assert_eq!(
            parse("1 + 2 * 3 - 4").expect("parse"),
            Expr::Binary(
                BinaryOp::Sub,
                Box::new(Expr::Binary(
                    BinaryOp::Add,
                    lit(1),
                    Box::new(Expr::Binary(BinaryOp::Mul, lit(2), lit(3)))
                )),
                lit(4)
            )
        );
    }

    #[test]
    fn member_index_and_method_chain() {
        assert_eq!(
            parse(r#"metadata.labels["team"].startsWith("ml")"#).expect("parse"),
            Expr::Method(
                Box::new(Expr::Index(
                    Box::new(Expr::Member(var("metadata"), "labels".to_string())),
                    lit("team")
                )),
                "startsWith".to_string(),
                vec![Expr::Literal(Value::from("ml"))]
            )
        );
    }

    #[test]
    fn in_with_list_literal() {
        assert_eq!(
            parse(r#"x in ["a", 'b']"#).expect("parse"),
            Expr::Binary(
                BinaryOp::In,
                var("x"),
                Box::new(Expr::List(vec![
                    Expr::Literal(Value::from("a")),
                    Expr::Literal(Value::from("b")),
                ]))
            )
        );
    }

    #[test]
    fn ternary_is_lowest_and_right_nested() {
        assert_eq!(
            parse("a ? 1 : b ? 2 : 3").expect("parse"),
            Expr::Ternary(
                var("a"),
                lit(1),
                Box::new(Expr::Ternary(var("b"), lit(2), lit(3)))
            )
        );
    }

    #[test]
    fn unary_operators() {
        assert_eq!(
            parse("!-x").expect("parse"),
            Expr::Unary(
                UnaryOp::Not,
                Box::new(Expr::Unary(UnaryOp::Neg, var("x")))
            )
        );
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(parse(""), Err(ParseError::Syntax { offset: 0, .. })));
        assert!(matches!(parse("a =="), Err(ParseError::Syntax { offset: 4, .. })));
        assert!(matches!(parse("a b"), Err(ParseError::Syntax { offset: 2, .. })));
        assert!(parse("f(a,").is_err());
        assert!(parse("(a").is_err());
        assert!(parse("a ? b").is_err());
        assert!(parse("a.1").is_err());
    }

    #[test]
    fn source_length_is_bounded() {
        let long = format!("\"{}\"", "x".repeat(MAX_SOURCE_LEN));
        assert!(matches!(parse(&long), Err(ParseError::TooLong { .. })));
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let ok = format!("{}true{}", "(".repeat(MAX_DEPTH - 1), ")".repeat(MAX_DEPTH - 1));
        assert!(parse(&ok).is_ok());

        let deep = format!("{}true{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse(&deep), Err(ParseError::TooDeep { limit: MAX_DEPTH }));

        let bangs = format!("{}true", "!".repeat(MAX_DEPTH + 1));
        assert_eq!(parse(&bangs), Err(ParseError::TooDeep { limit: MAX_DEPTH }));
    }

    #[test]
    fn operator_chains_count_toward_depth() {
        let short = vec!["1"; 20].join(" + ");
        assert!(parse(&format!("{short} == 20")).is_ok());

        // well under the length limit, but thousands of levels deep
        let long = vec!["1"; 2040].join("+");
        let src = format!("{long} == 0");
        assert!(src.len() <= MAX_SOURCE_LEN);
        assert_eq!(parse(&src), Err(ParseError::TooDeep { limit: MAX_DEPTH }));

        let ands = vec!["true"; 200].join(" && ");
        assert_eq!(parse(&ands), Err(ParseError::TooDeep { limit: MAX_DEPTH }));
    }

    #[test]
    fn member_chains_count_toward_depth() {
        assert!(parse("spec.provider.overrides.spec.a.b").is_ok());

        let fields = format!("spec{}", ".a".repeat(500));
        assert_eq!(parse(&fields), Err(ParseError::TooDeep { limit: MAX_DEPTH }));

        let indexes = format!("spec{}", "[0]".repeat(500));
        assert_eq!(parse(&indexes), Err(ParseError::TooDeep { limit: MAX_DEPTH }));
    }

    #[test]
    fn field_paths_are_collected() {
        let expr = parse(
            r#"spec.engine.type == "vllm" && metadata.labels["team"] == "x" && has(spec.provider.name)"#,
        )
        .expect("parse");
        let mut paths = Vec::new();
        expr.field_paths(&mut paths);
        assert_eq!(paths, vec!["spec.engine.type", "metadata.labels.team"]);
    }
}
