//! Recursive-descent parser.
//!
//! Precedence, loosest first:
//!
//! ```text
//! or         := and ('||' and)*
//! and        := equality ('&&' equality)*
//! equality   := relational (('==' | '!=' | '===' | '!==') relational)*
//! relational := additive (('<' | '<=' | '>' | '>=') additive)*
//! additive   := term (('+' | '-') term)*
//! term       := unary (('*' | '/' | '%') unary)*
//! unary      := ('!' | '-' | '+') unary | postfix
//! postfix    := primary ('.' ident | '?.' ident | '?.' '[' or ']' | '?.' '(' args ')'
//!                        | '[' or ']' | '(' args ')')*
//! primary    := number | string | ident | '(' or ')' | '[' list ']' | '{' fields '}'
//! ```

use super::ast::{BinaryOp, Expr, Literal, LogicalOp, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::ParseError;

/// Maximum syntax tree height. Nesting and operator chains both count, so
/// deeper input is rejected instead of overflowing the stack.
const MAX_DEPTH: usize = 128;

/// Parse a complete expression.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let found = match self.peek() {
            Token::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        };
        ParseError::new(self.source, self.offset(), format!("{message}, found {found}"))
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let mut lhs = self.parse_and()?;
        let base = self.depth;
        while self.eat(&Token::OrOr) {
            self.enter()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Logical {
                op: LogicalOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base - 1;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        let base = self.depth;
        while self.eat(&Token::AndAnd) {
            self.enter()?;
            let rhs = self.parse_equality()?;
            lhs = Expr::Logical {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_relational()?;
        let base = self.depth;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::NotEq,
                Token::StrictEq => BinaryOp::StrictEq,
                Token::StrictNotEq => BinaryOp::StrictNotEq,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let rhs = self.parse_relational()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        let base = self.depth;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::LtEq => BinaryOp::LtEq,
                Token::Gt => BinaryOp::Gt,
                Token::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        let base = self.depth;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let rhs = self.parse_term()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        let base = self.depth;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            self.enter()?;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let expr = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        let base = self.depth;
        loop {
            if matches!(
                self.peek(),
                Token::Dot | Token::QuestionDot | Token::LBracket | Token::LParen
            ) {
                self.enter()?;
            }
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let property = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: false,
                    };
                }
                Token::QuestionDot => {
                    self.advance();
                    expr = match self.peek() {
                        Token::LBracket => {
                            self.advance();
                            let index = self.parse_or()?;
                            self.expect(&Token::RBracket, "']'")?;
                            Expr::Index {
                                object: Box::new(expr),
                                index: Box::new(index),
                                optional: true,
                            }
                        }
                        Token::LParen => {
                            self.advance();
                            let args = self.parse_list(&Token::RParen, "')'")?;
                            Expr::Call {
                                callee: Box::new(expr),
                                args,
                                optional: true,
                            }
                        }
                        _ => Expr::Member {
                            object: Box::new(expr),
                            property: self.property_name()?,
                            optional: true,
                        },
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_or()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    };
                }
                Token::LParen => {
                    self.advance();
                    let args = self.parse_list(&Token::RParen, "')'")?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: false,
                    };
                }
                _ => break,
            }
        }
        self.depth = base;
        Ok(expr)
    }

    fn property_name(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected property name")),
        }
    }

    fn parse_list(&mut self, close: &Token, what: &str) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(&Token::Comma, &format!("',' or {what}"))?;
            // Trailing comma.
            if self.eat(close) {
                return Ok(items);
            }
        }
    }

    fn parse_object(&mut self) -> Result<Expr, ParseError> {
        let mut fields = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Object(fields));
        }
        loop {
            let key = match self.peek().clone() {
                Token::Ident(name) | Token::Str(name) => name,
                Token::Number(n) => format_key(n),
                _ => return Err(self.error("expected object key")),
            };
            self.advance();
            self.expect(&Token::Colon, "':'")?;
            let value = self.parse_or()?;
            fields.push((key, value));

            if self.eat(&Token::RBrace) {
                return Ok(Expr::Object(fields));
            }
            self.expect(&Token::Comma, "',' or '}'")?;
            if self.eat(&Token::RBrace) {
                return Ok(Expr::Object(fields));
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let expr = match self.peek().clone() {
            Token::Number(n) => Expr::Literal(Literal::Number(n)),
            Token::Str(s) => Expr::Literal(Literal::Str(s)),
            Token::Ident(name) => match name.as_str() {
                "true" => Expr::Literal(Literal::Bool(true)),
                "false" => Expr::Literal(Literal::Bool(false)),
                "null" => Expr::Literal(Literal::Null),
                "undefined" => Expr::Literal(Literal::Undefined),
                _ => Expr::Ident(name),
            },
            Token::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                return Ok(inner);
            }
            Token::LBracket => {
                self.advance();
                self.enter()?;
                let items = self.parse_list(&Token::RBracket, "']'")?;
                self.depth -= 1;
                return Ok(Expr::Array(items));
            }
            Token::LBrace => {
                self.advance();
                self.enter()?;
                let object = self.parse_object()?;
                self.depth -= 1;
                return Ok(object);
            }
            _ => return Err(self.error("expected expression")),
        };
        self.advance();
        Ok(expr)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn format_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Expr {
        Expr::Literal(Literal::Number(n))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse("1 + 2 * 3").unwrap(),
            binary(BinaryOp::Add, num(1.0), binary(BinaryOp::Mul, num(2.0), num(3.0)))
        );
    }

    #[test]
    fn test_left_associative() {
        assert_eq!(
            parse("8 - 4 - 2").unwrap(),
            binary(BinaryOp::Sub, binary(BinaryOp::Sub, num(8.0), num(4.0)), num(2.0))
        );
    }

    #[test]
    fn test_optional_chain_shape() {
        let expr = parse("a?.b.c").unwrap();
        let Expr::Member {
            object,
            property,
            optional,
        } = expr
        else {
            panic!("expected member");
        };
        assert_eq!(property, "c");
        assert!(!optional);
        assert!(matches!(*object, Expr::Member { optional: true, .. }));
    }

    #[test]
    fn test_method_call_and_index() {
        let expr = parse("closest.enemy(5)?.tags[0]").unwrap();
        assert!(matches!(expr, Expr::Index { optional: false, .. }));
    }

    #[test]
    fn test_literals_and_collections() {
        let expr = parse("{a: [1, 'x', null], 'b c': true, }").unwrap();
        let Expr::Object(fields) = expr else {
            panic!("expected object");
        };
        assert_eq!(fields[0].0, "a");
        assert_eq!(fields[1].0, "b c");
        assert_eq!(
            fields[0].1,
            Expr::Array(vec![
                num(1.0),
                Expr::Literal(Literal::Str("x".into())),
                Expr::Literal(Literal::Null),
            ])
        );
    }

    #[test]
    fn test_errors_carry_offset() {
        let err = parse("1 + * 2").unwrap_err();
        assert_eq!(err.offset, 4);

        let err = parse("(1 + 2").unwrap_err();
        assert_eq!(err.offset, 6);

        let err = parse("a b").unwrap_err();
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn test_depth_limit() {
        let source = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(parse(&source).is_err());
    }

    #[test]
    fn test_long_operator_chains_are_rejected() {
        let source = "1+".repeat(200_000) + "1";
        let err = parse(&source).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
        assert!(parse(&vec!["x"; 500].join(" && ")).is_err());
        let members = format!("a{}", ".b".repeat(10_000));
        assert!(parse(&members).is_err());
    }

    #[test]
    fn test_moderate_chains_still_parse() {
        let sum = vec!["1"; 40].join(" + ");
        assert!(parse(&sum).is_ok());
        assert!(parse("a.b.c[0].d(1, 2) * 2 - -x || y && z == 3").is_ok());
        let nested = format!("{}1{}", "(".repeat(30), ")".repeat(30));
        assert!(parse(&nested).is_ok());
    }
}
