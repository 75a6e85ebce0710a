// Expression parser: top-down operator precedence (Pratt) over a token buffer

use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::ast::{ArithmeticOp, AstNode, ComparisonOp, UnaryOp};
use crate::lexer::{tokenize, LexError, SpannedToken, Token};
use crate::value::Value;

/// Parser errors
///
/// Every variant carries the character offset it was detected at. Parsing
/// stops at the first error; no partial tree is ever returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("Unexpected {found} at position {position}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        position: usize,
    },

    #[error("Invalid JSON literal at position {position}: {message}")]
    InvalidLiteral { position: usize, message: String },

    #[error("Expected an integer at position {position}, found {found}")]
    ExpectedInteger { found: String, position: usize },

    #[error("Expression nests deeper than {limit} levels at position {position}")]
    TooDeep { limit: usize, position: usize },
}

impl ParserError {
    pub fn position(&self) -> usize {
        match self {
            ParserError::Lex(e) => e.position(),
            ParserError::UnexpectedToken { position, .. }
            | ParserError::InvalidLiteral { position, .. }
            | ParserError::ExpectedInteger { position, .. }
            | ParserError::TooDeep { position, .. } => *position,
        }
    }
}

/// Parse an expression into its AST.
pub fn parse(expression: &str) -> Result<AstNode, ParserError> {
    let mut parser = Parser::new(expression)?;
    parser.parse()
}

// Binding powers, loosest first
const PIPE_BP: u8 = 1;
const TERNARY_BP: u8 = 2;
const OR_BP: u8 = 3;
const AND_BP: u8 = 4;
const COMPARISON_BP: u8 = 5;
const ADDITIVE_BP: u8 = 6;
const MULTIPLICATIVE_BP: u8 = 7;
const FLATTEN_BP: u8 = 9;
/// Tokens binding looser than this end the right side of a projection.
const PROJECTION_STOP: u8 = 10;
const STAR_BP: u8 = 20;
const FILTER_BP: u8 = 21;
const DOT_BP: u8 = 40;
const PREFIX_BP: u8 = 45;
const LEFT_BRACE_BP: u8 = 50;
const LEFT_BRACKET_BP: u8 = 55;
const LEFT_PAREN_BP: u8 = 60;

/// Deepest nesting of sub-expressions a parse will descend into.
pub const MAX_PARSE_DEPTH: usize = 512;

static EOF: SpannedToken = SpannedToken {
    token: Token::Eof,
    position: 0,
};

/// Parser over an eagerly tokenized expression
pub struct Parser {
    tokens: Vec<SpannedToken>,
    index: usize,
    depth: usize,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, ParserError> {
        Ok(Parser {
            tokens: tokenize(input)?,
            index: 0,
            depth: 0,
        })
    }

    /// Parse the whole token buffer into exactly one root node.
    pub fn parse(&mut self) -> Result<AstNode, ParserError> {
        let ast = self.parse_expression(0)?;
        if *self.current() != Token::Eof {
            return Err(self.unexpected("end of expression"));
        }
        trace!(tokens = self.tokens.len(), "parsed expression");
        Ok(ast)
    }

    fn spanned(&self, offset: usize) -> &SpannedToken {
        self.tokens.get(self.index + offset).unwrap_or(&EOF)
    }

    fn current(&self) -> &Token {
        &self.spanned(0).token
    }

    fn peek(&self, offset: usize) -> &Token {
        &self.spanned(offset).token
    }

    fn position(&self) -> usize {
        match self.tokens.get(self.index) {
            Some(t) => t.position,
            None => self.tokens.last().map_or(0, |t| t.position),
        }
    }

    fn advance(&mut self) {
        if self.index < self.tokens.len() {
            self.index += 1;
        }
    }

    /// Take the current token and move past it.
    fn next(&mut self) -> SpannedToken {
        let spanned = self.spanned(0).clone();
        self.advance();
        spanned
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParserError> {
        if std::mem::discriminant(self.current()) == std::mem::discriminant(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&expected.to_string()))
        }
    }

    fn unexpected(&self, expected: &str) -> ParserError {
        ParserError::UnexpectedToken {
            found: self.current().to_string(),
            expected: expected.to_string(),
            position: self.position(),
        }
    }

    /// Left binding power of a token in infix position
    fn binding_power(token: &Token) -> u8 {
        match token {
            Token::Pipe => PIPE_BP,
            Token::Question => TERNARY_BP,
            Token::Or => OR_BP,
            Token::And => AND_BP,
            Token::Equal
            | Token::NotEqual
            | Token::LessThan
            | Token::LessThanOrEqual
            | Token::GreaterThan
            | Token::GreaterThanOrEqual => COMPARISON_BP,
            Token::Plus | Token::Minus => ADDITIVE_BP,
            // In infix position `*` multiplies; `foo.*` is handled by the dot
            Token::Star
            | Token::Multiply
            | Token::Divide
            | Token::Modulo
            | Token::IntegerDivide => MULTIPLICATIVE_BP,
            Token::Flatten => FLATTEN_BP,
            Token::Filter => FILTER_BP,
            Token::Dot => DOT_BP,
            Token::LeftBrace => LEFT_BRACE_BP,
            Token::LeftBracket => LEFT_BRACKET_BP,
            Token::LeftParen => LEFT_PAREN_BP,
            _ => 0,
        }
    }

    /// Parse an expression with Pratt parsing
    fn parse_expression(&mut self, min_bp: u8) -> Result<AstNode, ParserError> {
        if self.depth >= MAX_PARSE_DEPTH {
            return Err(ParserError::TooDeep {
                limit: MAX_PARSE_DEPTH,
                position: self.position(),
            });
        }
        self.depth += 1;
        let result = self.parse_expression_inner(min_bp);
        self.depth -= 1;
        result
    }

    fn parse_expression_inner(&mut self, min_bp: u8) -> Result<AstNode, ParserError> {
        let mut lhs = self.parse_prefix()?;
        while min_bp < Self::binding_power(self.current()) {
            lhs = self.parse_infix(lhs)?;
        }
        Ok(lhs)
    }

    /// Tokens that start an expression
    fn parse_prefix(&mut self) -> Result<AstNode, ParserError> {
        let position = self.position();
        match &self.current().clone() {
            Token::Eof => Err(self.unexpected("an expression")),
            Token::Literal(json) => {
                self.advance();
                serde_json::from_str::<Value>(json)
                    .map(AstNode::Literal)
                    .map_err(|e| ParserError::InvalidLiteral {
                        position,
                        message: e.to_string(),
                    })
            }
            Token::RawString(s) => {
                self.advance();
                Ok(AstNode::RawString(s.clone()))
            }
            Token::Number(n) => {
                self.advance();
                Ok(AstNode::Literal(Value::Number(*n)))
            }
            Token::UnquotedIdentifier(name) => {
                self.advance();
                if name == "let" && matches!(self.current(), Token::Variable(_)) {
                    return self.parse_let();
                }
                Ok(AstNode::Field(name.clone()))
            }
            Token::QuotedIdentifier(name) => {
                self.advance();
                if *self.current() == Token::LeftParen {
                    return Err(ParserError::UnexpectedToken {
                        found: Token::QuotedIdentifier(name.clone()).to_string(),
                        expected: "an unquoted function name".to_string(),
                        position,
                    });
                }
                Ok(AstNode::Field(name.clone()))
            }
            Token::Star => {
                self.advance();
                let rhs = self.parse_projection_rhs(STAR_BP)?;
                Ok(AstNode::ValueProjection {
                    lhs: Box::new(AstNode::Identity),
                    rhs: Box::new(rhs),
                })
            }
            Token::Filter => {
                self.advance();
                self.parse_filter(AstNode::Identity)
            }
            Token::Flatten => {
                self.advance();
                let rhs = self.parse_projection_rhs(FLATTEN_BP)?;
                Ok(AstNode::projection(
                    AstNode::Flatten(Box::new(AstNode::Identity)),
                    rhs,
                ))
            }
            Token::LeftBrace => {
                self.advance();
                self.parse_multi_select_hash()
            }
            Token::LeftBracket => {
                self.advance();
                match self.current() {
                    Token::Number(_) | Token::Colon | Token::Minus => {
                        let index = self.parse_index_expression()?;
                        self.project_if_slice(AstNode::Identity, index)
                    }
                    Token::Star if *self.peek(1) == Token::RightBracket => {
                        self.advance();
                        self.advance();
                        let rhs = self.parse_projection_rhs(STAR_BP)?;
                        Ok(AstNode::projection(AstNode::Identity, rhs))
                    }
                    _ => self.parse_multi_select_list(),
                }
            }
            Token::Current => {
                self.advance();
                Ok(AstNode::Identity)
            }
            Token::Root => {
                self.advance();
                Ok(AstNode::Root)
            }
            Token::Variable(name) => {
                self.advance();
                Ok(AstNode::Variable(name.clone()))
            }
            Token::Ampersand => {
                self.advance();
                let body = self.parse_expression(0)?;
                Ok(AstNode::ExpressionRef(Arc::new(body)))
            }
            Token::Not => {
                self.advance();
                let operand = self.parse_expression(PREFIX_BP)?;
                Ok(AstNode::Not(Box::new(operand)))
            }
            Token::Minus => {
                self.advance();
                match self.parse_expression(PREFIX_BP)? {
                    AstNode::Literal(Value::Number(n)) => Ok(AstNode::Literal(Value::Number(-n))),
                    operand => Ok(AstNode::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    }),
                }
            }
            Token::Plus => {
                self.advance();
                let operand = self.parse_expression(PREFIX_BP)?;
                Ok(AstNode::Unary {
                    op: UnaryOp::Plus,
                    operand: Box::new(operand),
                })
            }
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_expression(0)?;
                self.expect(Token::RightParen)?;
                Ok(inner)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Tokens that continue an expression
    fn parse_infix(&mut self, lhs: AstNode) -> Result<AstNode, ParserError> {
        let SpannedToken { token, position } = self.next();
        match token {
            Token::Dot => {
                if *self.current() == Token::Star {
                    self.advance();
                    let rhs = self.parse_projection_rhs(STAR_BP)?;
                    return Ok(AstNode::ValueProjection {
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    });
                }
                let rhs = self.parse_dot_rhs(DOT_BP)?;
                Ok(AstNode::subexpression(lhs, rhs))
            }
            Token::Pipe => {
                let rhs = self.parse_expression(PIPE_BP)?;
                Ok(AstNode::Pipe {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            Token::Or => {
                let rhs = self.parse_expression(OR_BP)?;
                Ok(AstNode::Or {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            Token::And => {
                let rhs = self.parse_expression(AND_BP)?;
                Ok(AstNode::And {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            Token::Question => {
                let then_branch = self.parse_expression(0)?;
                self.expect(Token::Colon)?;
                // One below the ternary's own power: `a ? b : c ? d : e` nests to the right
                let else_branch = self.parse_expression(TERNARY_BP - 1)?;
                Ok(AstNode::Ternary {
                    condition: Box::new(lhs),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                })
            }
            Token::Equal
            | Token::NotEqual
            | Token::LessThan
            | Token::LessThanOrEqual
            | Token::GreaterThan
            | Token::GreaterThanOrEqual => {
                let op = match token {
                    Token::Equal => ComparisonOp::Equal,
                    Token::NotEqual => ComparisonOp::NotEqual,
                    Token::LessThan => ComparisonOp::LessThan,
                    Token::LessThanOrEqual => ComparisonOp::LessThanOrEqual,
                    Token::GreaterThan => ComparisonOp::GreaterThan,
                    _ => ComparisonOp::GreaterThanOrEqual,
                };
                let rhs = self.parse_expression(COMPARISON_BP)?;
                Ok(AstNode::Comparison {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            Token::Plus
            | Token::Minus
            | Token::Star
            | Token::Multiply
            | Token::Divide
            | Token::Modulo
            | Token::IntegerDivide => {
                let bp = Self::binding_power(&token);
                let op = match token {
                    Token::Plus => ArithmeticOp::Add,
                    Token::Minus => ArithmeticOp::Subtract,
                    Token::Divide => ArithmeticOp::Divide,
                    Token::Modulo => ArithmeticOp::Modulo,
                    Token::IntegerDivide => ArithmeticOp::IntegerDivide,
                    _ => ArithmeticOp::Multiply,
                };
                let rhs = self.parse_expression(bp)?;
                Ok(AstNode::Arithmetic {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                })
            }
            Token::LeftParen => {
                let name = match lhs {
                    AstNode::Field(name) => name,
                    _ => {
                        return Err(ParserError::UnexpectedToken {
                            found: Token::LeftParen.to_string(),
                            expected: "a function name before '('".to_string(),
                            position,
                        })
                    }
                };
                let mut args = Vec::new();
                while *self.current() != Token::RightParen {
                    args.push(self.parse_expression(0)?);
                    if *self.current() == Token::Comma {
                        self.advance();
                        if *self.current() == Token::RightParen {
                            return Err(self.unexpected("an expression"));
                        }
                    } else if *self.current() != Token::RightParen {
                        return Err(self.unexpected("',' or ')'"));
                    }
                }
                self.expect(Token::RightParen)?;
                Ok(AstNode::FunctionCall { name, args })
            }
            Token::Filter => self.parse_filter(lhs),
            Token::Flatten => {
                let rhs = self.parse_projection_rhs(FLATTEN_BP)?;
                Ok(AstNode::projection(AstNode::Flatten(Box::new(lhs)), rhs))
            }
            Token::LeftBracket => match self.current() {
                Token::Number(_) | Token::Colon | Token::Minus => {
                    let index = self.parse_index_expression()?;
                    self.project_if_slice(lhs, index)
                }
                Token::Star => {
                    self.advance();
                    self.expect(Token::RightBracket)?;
                    let rhs = self.parse_projection_rhs(STAR_BP)?;
                    Ok(AstNode::projection(lhs, rhs))
                }
                _ => Err(self.unexpected("a number, ':' or '*'")),
            },
            other => Err(ParserError::UnexpectedToken {
                found: other.to_string(),
                expected: "an operator".to_string(),
                position,
            }),
        }
    }

    /// The right side of a projection: keeps absorbing `.x`, `[..]` and `[?..]`
    /// continuations and stops at anything that binds looser than a projection.
    fn parse_projection_rhs(&mut self, bp: u8) -> Result<AstNode, ParserError> {
        if Self::binding_power(self.current()) < PROJECTION_STOP {
            return Ok(AstNode::Identity);
        }
        match self.current() {
            Token::LeftBracket | Token::Filter => self.parse_expression(bp),
            Token::Dot => {
                self.advance();
                self.parse_dot_rhs(bp)
            }
            _ => Err(self.unexpected("'.', '[' or '[?'")),
        }
    }

    /// What may follow a dot: a name, a wildcard or a multi-select.
    fn parse_dot_rhs(&mut self, bp: u8) -> Result<AstNode, ParserError> {
        match self.current() {
            Token::UnquotedIdentifier(_) | Token::QuotedIdentifier(_) | Token::Star => {
                self.parse_expression(bp)
            }
            Token::LeftBracket => {
                self.advance();
                self.parse_multi_select_list()
            }
            Token::LeftBrace => {
                self.advance();
                self.parse_multi_select_hash()
            }
            _ => Err(self.unexpected("an identifier, '*', '[' or '{'")),
        }
    }

    /// `[?predicate]`, the opening token already consumed.
    fn parse_filter(&mut self, lhs: AstNode) -> Result<AstNode, ParserError> {
        let predicate = self.parse_expression(0)?;
        self.expect(Token::RightBracket)?;
        let rhs = if *self.current() == Token::Flatten {
            AstNode::Identity
        } else {
            self.parse_projection_rhs(FILTER_BP)?
        };
        Ok(AstNode::FilterProjection {
            lhs: Box::new(lhs),
            predicate: Box::new(predicate),
            rhs: Box::new(rhs),
        })
    }

    /// `[n]` or `[start:stop:step]`, the opening bracket already consumed.
    fn parse_index_expression(&mut self) -> Result<AstNode, ParserError> {
        let mut parts: [Option<i64>; 3] = [None; 3];
        let mut slot = 0;

        loop {
            if matches!(self.current(), Token::Number(_) | Token::Minus) {
                parts[slot] = Some(self.parse_signed_integer()?);
            }
            match self.current() {
                Token::Colon if slot < 2 => {
                    slot += 1;
                    self.advance();
                }
                Token::RightBracket => {
                    self.advance();
                    break;
                }
                _ if slot < 2 => return Err(self.unexpected("':' or ']'")),
                _ => return Err(self.unexpected("']'")),
            }
        }

        if slot == 0 {
            match parts[0] {
                Some(index) => Ok(AstNode::Index(index)),
                None => Err(self.unexpected("an index")),
            }
        } else {
            let [start, stop, step] = parts;
            Ok(AstNode::Slice { start, stop, step })
        }
    }

    fn parse_signed_integer(&mut self) -> Result<i64, ParserError> {
        let negative = *self.current() == Token::Minus;
        if negative {
            self.advance();
        }
        let position = self.position();
        match self.current() {
            Token::Number(n) if n.fract() == 0.0 => {
                let n = *n as i64;
                self.advance();
                Ok(if negative { -n } else { n })
            }
            Token::Number(n) => Err(ParserError::ExpectedInteger {
                found: n.to_string(),
                position,
            }),
            _ => Err(self.unexpected("an integer")),
        }
    }

    /// An index applies directly; a slice produces an array and projects.
    fn project_if_slice(&mut self, lhs: AstNode, index: AstNode) -> Result<AstNode, ParserError> {
        let is_slice = matches!(index, AstNode::Slice { .. });
        let access = match lhs {
            AstNode::Identity => index,
            lhs => AstNode::subexpression(lhs, index),
        };
        if is_slice {
            let rhs = self.parse_projection_rhs(STAR_BP)?;
            Ok(AstNode::projection(access, rhs))
        } else {
            Ok(access)
        }
    }

    /// `[a, b, ...]`, the opening bracket already consumed.
    fn parse_multi_select_list(&mut self) -> Result<AstNode, ParserError> {
        let mut elements = Vec::new();
        loop {
            elements.push(self.parse_expression(0)?);
            if *self.current() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RightBracket)?;
        Ok(AstNode::MultiSelectList(elements))
    }

    /// `{key: a, ...}`, the opening brace already consumed.
    fn parse_multi_select_hash(&mut self) -> Result<AstNode, ParserError> {
        let mut pairs = Vec::new();
        loop {
            let key = match self.current() {
                Token::UnquotedIdentifier(name) | Token::QuotedIdentifier(name) => name.clone(),
                _ => return Err(self.unexpected("an identifier")),
            };
            self.advance();
            self.expect(Token::Colon)?;
            let value = self.parse_expression(0)?;
            pairs.push((key, value));

            if *self.current() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(Token::RightBrace)?;
        Ok(AstNode::MultiSelectHash(pairs))
    }

    /// `let $a = x, $b = y in body`, the `let` keyword already consumed.
    fn parse_let(&mut self) -> Result<AstNode, ParserError> {
        let mut bindings = Vec::new();
        loop {
            let name = match self.current() {
                Token::Variable(name) => name.clone(),
                _ => return Err(self.unexpected("a variable")),
            };
            self.advance();
            self.expect(Token::Assign)?;
            let value = self.parse_expression(0)?;
            bindings.push((name, value));

            if *self.current() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }

        match self.current() {
            Token::UnquotedIdentifier(keyword) if keyword == "in" => self.advance(),
            _ => return Err(self.unexpected("'in'")),
        }

        let body = self.parse_expression(0)?;
        Ok(AstNode::Let {
            bindings,
            body: Box::new(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn field(name: &str) -> AstNode {
        AstNode::field(name)
    }

    fn boxed(node: AstNode) -> Box<AstNode> {
        Box::new(node)
    }

    #[test]
    fn test_parse_field_chain() {
        let ast = parse("foo.bar.baz").unwrap();
        assert_eq!(
            ast,
            AstNode::subexpression(
                AstNode::subexpression(field("foo"), field("bar")),
                field("baz")
            )
        );
    }

    #[test]
    fn test_parse_index_and_negative_index() {
        assert_eq!(
            parse("foo[0]").unwrap(),
            AstNode::subexpression(field("foo"), AstNode::Index(0))
        );
        assert_eq!(parse("[-1]").unwrap(), AstNode::Index(-1));
    }

    #[test]
    fn test_parse_slice_projects() {
        assert_eq!(
            parse("foo[1:3].bar").unwrap(),
            AstNode::projection(
                AstNode::subexpression(
                    field("foo"),
                    AstNode::Slice {
                        start: Some(1),
                        stop: Some(3),
                        step: None
                    }
                ),
                field("bar")
            )
        );
        assert_eq!(
            parse("[::-1]").unwrap(),
            AstNode::projection(
                AstNode::Slice {
                    start: None,
                    stop: None,
                    step: Some(-1)
                },
                AstNode::Identity
            )
        );
    }

    #[test]
    fn test_parse_wildcard_projection() {
        assert_eq!(
            parse("foo[*].bar").unwrap(),
            AstNode::projection(field("foo"), field("bar"))
        );
        assert_eq!(
            parse("foo.*.bar").unwrap(),
            AstNode::ValueProjection {
                lhs: boxed(field("foo")),
                rhs: boxed(field("bar")),
            }
        );
    }

    #[test]
    fn test_parse_flatten() {
        assert_eq!(
            parse("foo[].bar").unwrap(),
            AstNode::projection(AstNode::Flatten(boxed(field("foo"))), field("bar"))
        );
    }

    #[test]
    fn test_pipe_stops_projection() {
        assert_eq!(
            parse("foo[*].bar | [0]").unwrap(),
            AstNode::Pipe {
                lhs: boxed(AstNode::projection(field("foo"), field("bar"))),
                rhs: boxed(AstNode::Index(0)),
            }
        );
    }

    #[test]
    fn test_parse_filter() {
        let ast = parse("foo[?a == `1`].b").unwrap();
        assert_eq!(
            ast,
            AstNode::FilterProjection {
                lhs: boxed(field("foo")),
                predicate: boxed(AstNode::Comparison {
                    op: ComparisonOp::Equal,
                    lhs: boxed(field("a")),
                    rhs: boxed(AstNode::literal(1i64)),
                }),
                rhs: boxed(field("b")),
            }
        );
    }

    #[test]
    fn test_precedence_or_and_not() {
        // a || b && !c  =>  a || (b && (!c))
        assert_eq!(
            parse("a || b && !c").unwrap(),
            AstNode::Or {
                lhs: boxed(field("a")),
                rhs: boxed(AstNode::And {
                    lhs: boxed(field("b")),
                    rhs: boxed(AstNode::Not(boxed(field("c")))),
                }),
            }
        );
    }

    #[test]
    fn test_precedence_arithmetic() {
        assert_eq!(
            parse("a + b * c").unwrap(),
            AstNode::Arithmetic {
                op: ArithmeticOp::Add,
                lhs: boxed(field("a")),
                rhs: boxed(AstNode::Arithmetic {
                    op: ArithmeticOp::Multiply,
                    lhs: boxed(field("b")),
                    rhs: boxed(field("c")),
                }),
            }
        );
    }

    #[test]
    fn test_parse_multi_select() {
        assert_eq!(
            parse("[a, b.c]").unwrap(),
            AstNode::MultiSelectList(vec![
                field("a"),
                AstNode::subexpression(field("b"), field("c"))
            ])
        );
        assert_eq!(
            parse(r#"{x: a, "y z": b}"#).unwrap(),
            AstNode::MultiSelectHash(vec![
                ("x".to_string(), field("a")),
                ("y z".to_string(), field("b")),
            ])
        );
    }

    #[test]
    fn test_parse_function_call_with_expref() {
        assert_eq!(
            parse("sort_by(people, &age)").unwrap(),
            AstNode::FunctionCall {
                name: "sort_by".to_string(),
                args: vec![field("people"), AstNode::ExpressionRef(Arc::new(field("age")))],
            }
        );
    }

    #[test]
    fn test_parse_let() {
        assert_eq!(
            parse("let $x = a, $y = b in $x").unwrap(),
            AstNode::Let {
                bindings: vec![
                    ("$x".to_string(), field("a")),
                    ("$y".to_string(), field("b")),
                ],
                body: boxed(AstNode::variable("x")),
            }
        );
        // `let` without a variable is an ordinary field
        assert_eq!(parse("let").unwrap(), field("let"));
    }

    #[test]
    fn test_parse_ternary_is_right_associative() {
        assert_eq!(
            parse("a ? b : c ? d : e").unwrap(),
            AstNode::Ternary {
                condition: boxed(field("a")),
                then_branch: boxed(field("b")),
                else_branch: boxed(AstNode::Ternary {
                    condition: boxed(field("c")),
                    then_branch: boxed(field("d")),
                    else_branch: boxed(field("e")),
                }),
            }
        );
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(
            parse(r#"`{"a": [1, true]}`"#).unwrap(),
            AstNode::Literal(Value::from(serde_json::json!({"a": [1, true]})))
        );
        assert_eq!(parse("'raw'").unwrap(), AstNode::RawString("raw".to_string()));
        assert_eq!(parse("-2").unwrap(), AstNode::literal(-2i64));
        assert_eq!(parse("$").unwrap(), AstNode::Root);
        assert_eq!(parse("@").unwrap(), AstNode::Identity);
    }

    #[test]
    fn test_syntax_errors_carry_position_and_hint() {
        match parse("foo.").unwrap_err() {
            ParserError::UnexpectedToken {
                expected, position, ..
            } => {
                assert_eq!(position, 4);
                assert!(expected.contains("identifier"));
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert_eq!(parse("foo bar").unwrap_err().position(), 4);
        assert!(matches!(
            parse("`{bad`").unwrap_err(),
            ParserError::InvalidLiteral { position: 0, .. }
        ));
        assert!(matches!(
            parse("foo[1.5]").unwrap_err(),
            ParserError::ExpectedInteger { position: 4, .. }
        ));
        assert!(matches!(parse("a ^ b").unwrap_err(), ParserError::Lex(_)));
        assert!(parse("").is_err());
        assert!(parse("foo[0:1:2:3]").is_err());
        assert!(parse("{}").is_err());
        assert!(parse("\"f\"(a)").is_err());
        assert!(parse("foo(a,)").is_err());
        assert!(parse("let $x = 1 $x").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        // unoptimised frames are large; give the parser room to reach the limit
        let handle = std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(|| {
                let nested = |depth: usize| format!("{}a{}", "(".repeat(depth), ")".repeat(depth));
                assert!(parse(&nested(100)).is_ok());
                assert!(matches!(
                    parse(&nested(100_000)).unwrap_err(),
                    ParserError::TooDeep { limit: MAX_PARSE_DEPTH, position: 512 }
                ));
                assert!(matches!(
                    parse(&"!".repeat(100_000)).unwrap_err(),
                    ParserError::TooDeep { .. }
                ));
                assert!(matches!(
                    parse(&"[".repeat(100_000)).unwrap_err(),
                    ParserError::TooDeep { .. }
                ));
            })
            .unwrap();
        handle.join().unwrap();
    }
}
