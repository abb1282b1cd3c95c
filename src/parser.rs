// JSONata expression parser
// Hand-written lexer feeding a Pratt parser

use crate::ast::{AstNode, BinaryOp, UnaryOp};
use thiserror::Error;

/// Parser errors
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unclosed string literal")]
    UnclosedString,

    #[error("Invalid escape sequence: {0}")]
    InvalidEscape(String),

    #[error("Unclosed comment")]
    UnclosedComment,

    #[error("Unclosed backtick name")]
    UnclosedBacktick,

    #[error("Expected {expected}, found {found}")]
    Expected { expected: String, found: String },
}

/// Token types for the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    String(String),
    Number(f64),
    True,
    False,
    Null,

    Identifier(String),
    Variable(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    In,
    Ampersand,
    Dot,
    DotDot,
    Question,
    Colon,
    ColonEqual, // :=
    ChainPipe,  // ~>

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,

    Eof,
}

/// Lexer for tokenizing JSONata expressions
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

    /// Consume `n` characters and yield `token`.
    fn emit(&mut self, n: usize, token: Token) -> Token {
        for _ in 0..n {
            self.advance();
        }
        token
    }

    fn skip_whitespace(&mut self) {
        while self.current().map_or(false, char::is_whitespace) {
            self.advance();
        }
    }

    fn skip_comment(&mut self) -> Result<(), ParserError> {
        self.advance(); // '/'
        self.advance(); // '*'
        loop {
            match self.current() {
                None => return Err(ParserError::UnclosedComment),
                Some('*') if self.peek(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                Some(_) => self.advance(),
            }
        }
    }

    fn read_string(&mut self, quote_char: char) -> Result<String, ParserError> {
        let mut result = String::new();
        self.advance(); // opening quote

        loop {
            match self.current() {
                None => return Err(ParserError::UnclosedString),
                Some(ch) if ch == quote_char => {
                    self.advance();
                    return Ok(result);
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.current() {
                        None => return Err(ParserError::UnclosedString),
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{0008}',
                        Some('f') => '\u{000C}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => {
                            self.advance();
                            result.push(self.read_unicode_escape()?);
                            continue;
                        }
                        Some(ch) => return Err(ParserError::InvalidEscape(format!("\\{}", ch))),
                    };
                    result.push(escaped);
                    self.advance();
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    /// Reads the XXXX of a `\uXXXX` escape.
    fn read_unicode_escape(&mut self) -> Result<char, ParserError> {
        let mut hex = String::with_capacity(4);
        for _ in 0..4 {
            match self.current() {
                Some(h) if h.is_ascii_hexdigit() => {
                    hex.push(h);
                    self.advance();
                }
                _ => return Err(ParserError::InvalidEscape(format!("\\u{}", hex))),
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ParserError::InvalidEscape(format!("\\u{}", hex)))
    }

    fn read_digits(&mut self) {
        while self.current().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn read_number(&mut self) -> Result<f64, ParserError> {
        let start = self.position;
        self.read_digits();

        // `1..5` is a range, not a fraction
        if self.current() == Some('.') && self.peek(1).map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
            self.read_digits();
        }

        if matches!(self.current(), Some('e') | Some('E')) {
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                self.advance();
            }
            if !self.current().map_or(false, |c| c.is_ascii_digit()) {
                return Err(ParserError::InvalidNumber("Expected digit in exponent".to_string()));
            }
            self.read_digits();
        }

        let num_str: String = self.input[start..self.position].iter().collect();
        num_str.parse().map_err(|_| ParserError::InvalidNumber(num_str))
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while self.current().map_or(false, |c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        self.input[start..self.position].iter().collect()
    }

    fn read_backtick_name(&mut self) -> Result<String, ParserError> {
        self.advance();
        let start = self.position;
        while let Some(ch) = self.current() {
            if ch == '`' {
                let name: String = self.input[start..self.position].iter().collect();
                self.advance();
                return Ok(name);
            }
            self.advance();
        }
        Err(ParserError::UnclosedBacktick)
    }

    pub fn next_token(&mut self) -> Result<Token, ParserError> {
        loop {
            self.skip_whitespace();

            let Some(ch) = self.current() else {
                return Ok(Token::Eof);
            };
            let next = self.peek(1);

            let token = match (ch, next) {
                ('/', Some('*')) => {
                    self.skip_comment()?;
                    continue;
                }
                ('"', _) | ('\'', _) => Token::String(self.read_string(ch)?),
                ('`', _) => Token::Identifier(self.read_backtick_name()?),
                (c, _) if c.is_ascii_digit() => Token::Number(self.read_number()?),
                ('$', _) => {
                    self.advance();
                    Token::Variable(self.read_identifier())
                }

                ('.', Some('.')) => self.emit(2, Token::DotDot),
                (':', Some('=')) => self.emit(2, Token::ColonEqual),
                ('~', Some('>')) => self.emit(2, Token::ChainPipe),
                ('!', Some('=')) => self.emit(2, Token::NotEqual),
                ('>', Some('=')) => self.emit(2, Token::GreaterThanOrEqual),
                ('<', Some('=')) => self.emit(2, Token::LessThanOrEqual),

                ('(', _) => self.emit(1, Token::LeftParen),
                (')', _) => self.emit(1, Token::RightParen),
                ('[', _) => self.emit(1, Token::LeftBracket),
                (']', _) => self.emit(1, Token::RightBracket),
                ('{', _) => self.emit(1, Token::LeftBrace),
                ('}', _) => self.emit(1, Token::RightBrace),
                (',', _) => self.emit(1, Token::Comma),
                (';', _) => self.emit(1, Token::Semicolon),
                (':', _) => self.emit(1, Token::Colon),
                ('?', _) => self.emit(1, Token::Question),
                ('.', _) => self.emit(1, Token::Dot),
                ('+', _) => self.emit(1, Token::Plus),
                ('-', _) => self.emit(1, Token::Minus),
                ('*', _) => self.emit(1, Token::Star),
                ('/', _) => self.emit(1, Token::Slash),
                ('%', _) => self.emit(1, Token::Percent),
                ('=', _) => self.emit(1, Token::Equal),
                ('<', _) => self.emit(1, Token::LessThan),
                ('>', _) => self.emit(1, Token::GreaterThan),
                ('&', _) => self.emit(1, Token::Ampersand),

                (c, _) if c.is_alphabetic() || c == '_' => match self.read_identifier().as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "in" => Token::In,
                    ident => Token::Identifier(ident.to_string()),
                },

                (c, _) => return Err(ParserError::UnexpectedToken(c.to_string())),
            };
            return Ok(token);
        }
    }
}

/// Parser for JSONata expressions using Pratt parsing
pub struct Parser {
    lexer: Lexer,
    current_token: Token,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, ParserError> {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current_token,
        })
    }

    fn advance(&mut self) -> Result<(), ParserError> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParserError> {
        if std::mem::discriminant(&self.current_token) == std::mem::discriminant(&expected) {
            self.advance()
        } else {
            Err(ParserError::Expected {
                expected: format!("{:?}", expected),
                found: format!("{:?}", self.current_token),
            })
        }
    }

    /// (left_bp, right_bp) of an infix/postfix token; higher binds tighter
    fn binding_power(token: &Token) -> Option<(u8, u8)> {
        match token {
            Token::ColonEqual => Some((10, 9)), // right associative
            Token::Question => Some((20, 21)),
            Token::DotDot => Some((20, 21)),
            Token::Or => Some((25, 26)),
            Token::And => Some((30, 31)),
            Token::Equal
            | Token::NotEqual
            | Token::LessThan
            | Token::LessThanOrEqual
            | Token::GreaterThan
            | Token::GreaterThanOrEqual
            | Token::In
            | Token::ChainPipe => Some((40, 41)),
            Token::Ampersand | Token::Plus | Token::Minus => Some((50, 51)),
            Token::Star | Token::Slash | Token::Percent => Some((60, 61)),
            Token::Dot => Some((75, 76)),
            Token::LeftParen => Some((80, 81)),
            _ => None,
        }
    }

    /// Comma-separated expressions up to `close`; the opening token is already consumed.
    fn parse_list(&mut self, close: Token) -> Result<Vec<AstNode>, ParserError> {
        let mut items = Vec::new();
        if self.current_token != close {
            loop {
                items.push(self.parse_expression(0)?);
                if self.current_token != Token::Comma {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    /// `;`-separated expressions up to `close`, collapsed to a single node when
    /// there is only one.
    fn parse_sequence(&mut self, close: Token) -> Result<AstNode, ParserError> {
        let mut expressions = vec![self.parse_expression(0)?];
        while self.current_token == Token::Semicolon {
            self.advance()?;
            if self.current_token == close {
                break;
            }
            expressions.push(self.parse_expression(0)?);
        }
        self.expect(close)?;

        if expressions.len() == 1 {
            Ok(expressions.remove(0))
        } else {
            Ok(AstNode::Block(expressions))
        }
    }

    /// `($a, $b) { body }` following the `function` keyword
    fn parse_lambda(&mut self) -> Result<AstNode, ParserError> {
        self.expect(Token::LeftParen)?;
        let mut params = Vec::new();
        for param in self.parse_list(Token::RightParen)? {
            match param {
                AstNode::Variable(name) if !name.is_empty() => params.push(name),
                other => {
                    return Err(ParserError::InvalidSyntax(format!(
                        "Lambda parameters must be variables, found {:?}",
                        other
                    )))
                }
            }
        }
        self.expect(Token::LeftBrace)?;
        let body = self.parse_sequence(Token::RightBrace)?;
        Ok(AstNode::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn parse_primary(&mut self) -> Result<AstNode, ParserError> {
        let token = self.current_token.clone();
        self.advance()?;

        match token {
            Token::String(s) => Ok(AstNode::String(s)),
            Token::Number(n) => Ok(AstNode::Number(n)),
            Token::True => Ok(AstNode::Boolean(true)),
            Token::False => Ok(AstNode::Boolean(false)),
            Token::Null => Ok(AstNode::Null),
            Token::Identifier(name)
                if (name == "function" || name == "λ") && self.current_token == Token::LeftParen =>
            {
                self.parse_lambda()
            }
            Token::Identifier(name) => Ok(AstNode::Name(name)),
            Token::Variable(name) => Ok(AstNode::Variable(name)),
            Token::LeftParen => self.parse_sequence(Token::RightParen),
            Token::LeftBracket => Ok(AstNode::Array(self.parse_list(Token::RightBracket)?)),
            Token::LeftBrace => {
                let mut pairs = Vec::new();
                if self.current_token != Token::RightBrace {
                    loop {
                        let key = self.parse_expression(0)?;
                        self.expect(Token::Colon)?;
                        let value = self.parse_expression(0)?;
                        pairs.push((key, value));

                        if self.current_token != Token::Comma {
                            break;
                        }
                        self.advance()?;
                    }
                }
                self.expect(Token::RightBrace)?;
                Ok(AstNode::Object(pairs))
            }
            Token::Minus => {
                let operand = self.parse_expression(70)?;
                Ok(AstNode::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(operand),
                })
            }
            other => Err(ParserError::UnexpectedToken(format!("{:?}", other))),
        }
    }

    fn parse_expression(&mut self, min_bp: u8) -> Result<AstNode, ParserError> {
        let mut lhs = self.parse_primary()?;

        loop {
            let Some((left_bp, right_bp)) = Self::binding_power(&self.current_token) else {
                break;
            };
            if left_bp < min_bp {
                break;
            }

            match &self.current_token {
                Token::Dot => {
                    self.advance()?;
                    let rhs = self.parse_expression(right_bp)?;

                    let mut steps = match lhs {
                        AstNode::Path { steps } => steps,
                        other => vec![other],
                    };
                    match rhs {
                        AstNode::Path { steps: rhs_steps } => steps.extend(rhs_steps),
                        other => steps.push(other),
                    }
                    lhs = AstNode::Path { steps };
                }
                Token::LeftParen => {
                    self.advance()?;
                    let args = self.parse_list(Token::RightParen)?;
                    lhs = match lhs {
                        AstNode::Variable(name) if !name.is_empty() => AstNode::Function {
                            name,
                            args,
                            is_builtin: true,
                        },
                        AstNode::Name(name) => AstNode::Function {
                            name,
                            args,
                            is_builtin: false,
                        },
                        other => {
                            return Err(ParserError::InvalidSyntax(format!(
                                "Cannot call {:?} as a function",
                                other
                            )))
                        }
                    };
                }
                Token::Question => {
                    self.advance()?;
                    let then_branch = self.parse_expression(0)?;
                    let else_branch = if self.current_token == Token::Colon {
                        self.advance()?;
                        Some(Box::new(self.parse_expression(right_bp)?))
                    } else {
                        None
                    };
                    lhs = AstNode::Conditional {
                        condition: Box::new(lhs),
                        then_branch: Box::new(then_branch),
                        else_branch,
                    };
                }
                token => {
                    let op = match token {
                        Token::Plus => BinaryOp::Add,
                        Token::Minus => BinaryOp::Subtract,
                        Token::Star => BinaryOp::Multiply,
                        Token::Slash => BinaryOp::Divide,
                        Token::Percent => BinaryOp::Modulo,
                        Token::Equal => BinaryOp::Equal,
                        Token::NotEqual => BinaryOp::NotEqual,
                        Token::LessThan => BinaryOp::LessThan,
                        Token::LessThanOrEqual => BinaryOp::LessThanOrEqual,
                        Token::GreaterThan => BinaryOp::GreaterThan,
                        Token::GreaterThanOrEqual => BinaryOp::GreaterThanOrEqual,
                        Token::And => BinaryOp::And,
                        Token::Or => BinaryOp::Or,
                        Token::In => BinaryOp::In,
                        Token::Ampersand => BinaryOp::Concatenate,
                        Token::DotDot => BinaryOp::Range,
                        Token::ColonEqual => BinaryOp::ColonEqual,
                        Token::ChainPipe => BinaryOp::ChainPipe,
                        other => return Err(ParserError::UnexpectedToken(format!("{:?}", other))),
                    };

                    if op == BinaryOp::ColonEqual && !matches!(lhs, AstNode::Variable(_)) {
                        return Err(ParserError::InvalidSyntax(
                            "The left side of := must be a variable name".to_string(),
                        ));
                    }

                    self.advance()?;
                    let rhs = self.parse_expression(right_bp)?;
                    lhs = AstNode::binary(op, lhs, rhs);
                }
            }
        }

        Ok(lhs)
    }

    pub fn parse(&mut self) -> Result<AstNode, ParserError> {
        let ast = self.parse_expression(0)?;

        if self.current_token != Token::Eof {
            return Err(ParserError::Expected {
                expected: "end of expression".to_string(),
                found: format!("{:?}", self.current_token),
            });
        }

        Ok(ast)
    }
}

/// Parse a JSONata expression string into an AST
pub fn parse(expression: &str) -> Result<AstNode, ParserError> {
    Parser::new(expression)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token == Token::Eof {
                return out;
            }
            out.push(token);
        }
    }

    #[test]
    fn test_lexer_numbers() {
        assert_eq!(
            tokens("42 3.14 2.5e10 1E-5"),
            vec![
                Token::Number(42.0),
                Token::Number(3.14),
                Token::Number(2.5e10),
                Token::Number(1e-5)
            ]
        );
    }

    #[test]
    fn test_lexer_range_is_not_a_fraction() {
        assert_eq!(
            tokens("1..5"),
            vec![Token::Number(1.0), Token::DotDot, Token::Number(5.0)]
        );
    }

    #[test]
    fn test_lexer_minus_is_an_operator() {
        assert_eq!(
            tokens("$n-1"),
            vec![Token::Variable("n".to_string()), Token::Minus, Token::Number(1.0)]
        );
    }

    #[test]
    fn test_lexer_strings() {
        assert_eq!(
            tokens(r#""hello" 'world' "a\"bA""#),
            vec![
                Token::String("hello".to_string()),
                Token::String("world".to_string()),
                Token::String("a\"bA".to_string())
            ]
        );
    }

    #[test]
    fn test_lexer_operators() {
        assert_eq!(
            tokens(":= ~> != <= >= .. &"),
            vec![
                Token::ColonEqual,
                Token::ChainPipe,
                Token::NotEqual,
                Token::LessThanOrEqual,
                Token::GreaterThanOrEqual,
                Token::DotDot,
                Token::Ampersand
            ]
        );
    }

    #[test]
    fn test_lexer_comments_and_backticks() {
        assert_eq!(
            tokens("/* note */ `first name`"),
            vec![Token::Identifier("first name".to_string())]
        );
        assert!(matches!(
            Lexer::new("/* open").next_token(),
            Err(ParserError::UnclosedComment)
        ));
    }

    #[test]
    fn test_parse_precedence() {
        let ast = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            ast,
            AstNode::binary(
                BinaryOp::Add,
                AstNode::number(1.0),
                AstNode::binary(BinaryOp::Multiply, AstNode::number(2.0), AstNode::number(3.0))
            )
        );
    }

    #[test]
    fn test_parse_path() {
        let ast = parse("foo.bar.baz").unwrap();
        assert_eq!(
            ast,
            AstNode::Path {
                steps: vec![
                    AstNode::Name("foo".to_string()),
                    AstNode::Name("bar".to_string()),
                    AstNode::Name("baz".to_string())
                ]
            }
        );
    }

    #[test]
    fn test_parse_reduce_with_lambda() {
        let ast = parse("$reduce([1,2,3], function($i, $j){ $i + $j }, 10)").unwrap();
        match ast {
            AstNode::Function { name, args, is_builtin } => {
                assert_eq!(name, "reduce");
                assert!(is_builtin);
                assert_eq!(args.len(), 3);
                assert!(matches!(args[0], AstNode::Array(_)));
                assert!(matches!(&args[1], AstNode::Lambda { params, .. } if params.len() == 2));
                assert_eq!(args[2], AstNode::number(10.0));
            }
            other => panic!("expected function call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_lambda_symbol() {
        let ast = parse("λ($x){$x}").unwrap();
        assert!(matches!(ast, AstNode::Lambda { .. }));
    }

    #[test]
    fn test_parse_function_name_without_parens_is_a_field() {
        assert_eq!(parse("function").unwrap(), AstNode::Name("function".to_string()));
    }

    #[test]
    fn test_parse_chain_into_call() {
        let ast = parse("[1,2] ~> $reduce($add)").unwrap();
        match ast {
            AstNode::Binary { op: BinaryOp::ChainPipe, rhs, .. } => {
                assert!(matches!(*rhs, AstNode::Function { ref args, .. } if args.len() == 1));
            }
            other => panic!("expected chain, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_path_step_call() {
        let ast = parse("items.$reduce($add)").unwrap();
        match ast {
            AstNode::Path { steps } => {
                assert_eq!(steps.len(), 2);
                assert!(matches!(steps[1], AstNode::Function { .. }));
            }
            other => panic!("expected path, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_block_with_binding() {
        let ast = parse("($f := function($a,$b){$a*$b}; $reduce([2,3], $f))").unwrap();
        match ast {
            AstNode::Block(exprs) => {
                assert_eq!(exprs.len(), 2);
                assert!(matches!(exprs[0], AstNode::Binary { op: BinaryOp::ColonEqual, .. }));
            }
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_conditional() {
        let ast = parse("$x > 1 ? 'big' : 'small'").unwrap();
        assert!(matches!(ast, AstNode::Conditional { else_branch: Some(_), .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("1 +"), Err(ParserError::UnexpectedToken(_))));
        assert!(matches!(parse("(1"), Err(ParserError::Expected { .. })));
        assert!(matches!(parse("1 := 2"), Err(ParserError::InvalidSyntax(_))));
        assert!(matches!(parse("function($a, 1){$a}"), Err(ParserError::InvalidSyntax(_))));
        assert!(matches!(parse("'open"), Err(ParserError::UnclosedString)));
    }
}
