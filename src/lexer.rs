// Expression tokenizer

use std::fmt;

use thiserror::Error;

/// Lexer errors. Positions are character offsets into the expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },

    #[error("Unterminated {kind} starting at position {position}")]
    Unterminated { kind: &'static str, position: usize },

    #[error("Invalid quoted identifier at position {position}: {message}")]
    InvalidQuotedIdentifier { position: usize, message: String },

    #[error("Invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },
}

impl LexError {
    pub fn position(&self) -> usize {
        match self {
            LexError::UnexpectedCharacter { position, .. }
            | LexError::Unterminated { position, .. }
            | LexError::InvalidQuotedIdentifier { position, .. }
            | LexError::InvalidNumber { position, .. } => *position,
        }
    }
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Names and literals
    UnquotedIdentifier(String),
    QuotedIdentifier(String),
    /// `'...'` with escapes already resolved
    RawString(String),
    /// The JSON text between back-ticks, decoded by the parser
    Literal(String),
    Number(f64),
    /// `$name`, sigil included
    Variable(String),

    // Nodes
    Root,
    Current,

    // Structure
    Dot,
    Star,
    Flatten,
    Filter,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    LeftParen,
    RightParen,
    Comma,
    Colon,
    Question,
    Assign,

    // Operators
    Pipe,
    Or,
    And,
    Not,
    Ampersand,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    /// `×`; an ASCII `*` always lexes as `Star`
    Multiply,
    Divide,
    Modulo,
    IntegerDivide,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::UnquotedIdentifier(name) => write!(f, "identifier '{name}'"),
            Token::QuotedIdentifier(name) => write!(f, "quoted identifier \"{name}\""),
            Token::RawString(s) => write!(f, "raw string '{s}'"),
            Token::Literal(json) => write!(f, "literal `{json}`"),
            Token::Number(n) => write!(f, "number {n}"),
            Token::Variable(name) => write!(f, "variable {name}"),
            Token::Root => f.write_str("'$'"),
            Token::Current => f.write_str("'@'"),
            Token::Dot => f.write_str("'.'"),
            Token::Star => f.write_str("'*'"),
            Token::Flatten => f.write_str("'[]'"),
            Token::Filter => f.write_str("'[?'"),
            Token::LeftBracket => f.write_str("'['"),
            Token::RightBracket => f.write_str("']'"),
            Token::LeftBrace => f.write_str("'{'"),
            Token::RightBrace => f.write_str("'}'"),
            Token::LeftParen => f.write_str("'('"),
            Token::RightParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::Colon => f.write_str("':'"),
            Token::Question => f.write_str("'?'"),
            Token::Assign => f.write_str("'='"),
            Token::Pipe => f.write_str("'|'"),
            Token::Or => f.write_str("'||'"),
            Token::And => f.write_str("'&&'"),
            Token::Not => f.write_str("'!'"),
            Token::Ampersand => f.write_str("'&'"),
            Token::Equal => f.write_str("'=='"),
            Token::NotEqual => f.write_str("'!='"),
            Token::LessThan => f.write_str("'<'"),
            Token::LessThanOrEqual => f.write_str("'<='"),
            Token::GreaterThan => f.write_str("'>'"),
            Token::GreaterThanOrEqual => f.write_str("'>='"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Multiply => f.write_str("'×'"),
            Token::Divide => f.write_str("'/'"),
            Token::Modulo => f.write_str("'%'"),
            Token::IntegerDivide => f.write_str("'//'"),
            Token::Eof => f.write_str("end of expression"),
        }
    }
}

/// A token and the character offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub position: usize,
}

/// Tokenize a whole expression. The result always ends with `Token::Eof`.
pub fn tokenize(input: &str) -> Result<Vec<SpannedToken>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let spanned = lexer.next_token()?;
        let done = spanned.token == Token::Eof;
        tokens.push(spanned);
        if done {
            return Ok(tokens);
        }
    }
}

/// Lexer for tokenizing expressions
pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if self.position < self.input.len() {
            self.position += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// `"..."`: collect the raw text and decode it as a JSON string.
    fn read_quoted_identifier(&mut self) -> Result<String, LexError> {
        let start = self.position;
        self.advance(); // skip opening quote

        loop {
            match self.current() {
                None => {
                    return Err(LexError::Unterminated {
                        kind: "quoted identifier",
                        position: start,
                    })
                }
                Some('\\') => {
                    self.advance();
                    self.advance();
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some(_) => self.advance(),
            }
        }

        let raw: String = self.input[start..self.position].iter().collect();
        serde_json::from_str::<String>(&raw).map_err(|e| LexError::InvalidQuotedIdentifier {
            position: start,
            message: e.to_string(),
        })
    }

    /// `'...'`: only `\'` and `\\` are escapes, any other backslash is kept.
    fn read_raw_string(&mut self) -> Result<String, LexError> {
        let start = self.position;
        let mut result = String::new();
        self.advance(); // skip opening quote

        loop {
            match self.current() {
                None => {
                    return Err(LexError::Unterminated {
                        kind: "raw string",
                        position: start,
                    })
                }
                Some('\\') if matches!(self.peek(1), Some('\'') | Some('\\')) => {
                    self.advance();
                    if let Some(ch) = self.current() {
                        result.push(ch);
                    }
                    self.advance();
                }
                Some('\'') => {
                    self.advance();
                    return Ok(result);
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// `` `...` ``: keeps the JSON text verbatim except for escaped back-ticks.
    fn read_literal(&mut self) -> Result<String, LexError> {
        let start = self.position;
        let mut result = String::new();
        self.advance(); // skip opening back-tick

        loop {
            match self.current() {
                None => {
                    return Err(LexError::Unterminated {
                        kind: "literal",
                        position: start,
                    })
                }
                Some('\\') if self.peek(1) == Some('`') => {
                    result.push('`');
                    self.advance();
                    self.advance();
                }
                Some('`') => {
                    self.advance();
                    return Ok(result);
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<f64, LexError> {
        let start = self.position;

        while self.current().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        // Fractional part, only when a digit follows the dot
        if self.current() == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Exponent part
        if matches!(self.current(), Some('e') | Some('E')) {
            let signed = matches!(self.peek(1), Some('+') | Some('-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    self.advance();
                }
                while self.current().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let text: String = self.input[start..self.position].iter().collect();
        text.parse().map_err(|_| LexError::InvalidNumber {
            text,
            position: start,
        })
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;

        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        self.input[start..self.position].iter().collect()
    }

    /// Consume `len` characters and return `token`.
    fn single(&mut self, token: Token, len: usize) -> Token {
        for _ in 0..len {
            self.advance();
        }
        token
    }

    pub fn next_token(&mut self) -> Result<SpannedToken, LexError> {
        self.skip_whitespace();
        let position = self.position;

        let token = match self.current() {
            None => Token::Eof,

            Some('"') => Token::QuotedIdentifier(self.read_quoted_identifier()?),
            Some('\'') => Token::RawString(self.read_raw_string()?),
            Some('`') => Token::Literal(self.read_literal()?),

            Some(ch) if ch.is_ascii_digit() => Token::Number(self.read_number()?),

            Some('$') => {
                if self
                    .peek(1)
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                {
                    self.advance();
                    Token::Variable(format!("${}", self.read_identifier()))
                } else {
                    self.single(Token::Root, 1)
                }
            }

            Some('[') => match self.peek(1) {
                Some(']') => self.single(Token::Flatten, 2),
                Some('?') => self.single(Token::Filter, 2),
                _ => self.single(Token::LeftBracket, 1),
            },
            Some('|') if self.peek(1) == Some('|') => self.single(Token::Or, 2),
            Some('&') if self.peek(1) == Some('&') => self.single(Token::And, 2),
            Some('!') if self.peek(1) == Some('=') => self.single(Token::NotEqual, 2),
            Some('<') if self.peek(1) == Some('=') => self.single(Token::LessThanOrEqual, 2),
            Some('>') if self.peek(1) == Some('=') => self.single(Token::GreaterThanOrEqual, 2),
            Some('=') if self.peek(1) == Some('=') => self.single(Token::Equal, 2),
            Some('/') if self.peek(1) == Some('/') => self.single(Token::IntegerDivide, 2),

            Some('.') => self.single(Token::Dot, 1),
            Some('*') => self.single(Token::Star, 1),
            Some(']') => self.single(Token::RightBracket, 1),
            Some('{') => self.single(Token::LeftBrace, 1),
            Some('}') => self.single(Token::RightBrace, 1),
            Some('(') => self.single(Token::LeftParen, 1),
            Some(')') => self.single(Token::RightParen, 1),
            Some(',') => self.single(Token::Comma, 1),
            Some(':') => self.single(Token::Colon, 1),
            Some('?') => self.single(Token::Question, 1),
            Some('=') => self.single(Token::Assign, 1),
            Some('|') => self.single(Token::Pipe, 1),
            Some('!') => self.single(Token::Not, 1),
            Some('&') => self.single(Token::Ampersand, 1),
            Some('@') => self.single(Token::Current, 1),
            Some('<') => self.single(Token::LessThan, 1),
            Some('>') => self.single(Token::GreaterThan, 1),
            Some('+') => self.single(Token::Plus, 1),
            Some('-') | Some('\u{2212}') => self.single(Token::Minus, 1),
            Some('\u{00d7}') => self.single(Token::Multiply, 1),
            Some('/') | Some('\u{00f7}') => self.single(Token::Divide, 1),
            Some('%') => self.single(Token::Modulo, 1),

            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
                Token::UnquotedIdentifier(self.read_identifier())
            }

            Some(character) => {
                return Err(LexError::UnexpectedCharacter {
                    character,
                    position,
                })
            }
        };

        Ok(SpannedToken { token, position })
    }
}
