//! Expression parser for the sandboxed evaluator.
//!
//! Recursive descent over a closed grammar. Anything outside the grammar
//! (attribute access, indexing, assignment, calls to unregistered names) is
//! rejected here, so evaluation only ever sees a well-formed [`Expr`].
//!
//! Precedence, lowest first:
//! `→ ↔ ⊕ ↑ ↓`, `or`/`||`, `and`/`&&`, `not`/`!`, comparisons (chainable),
//! `+ -`, `* / %`, unary `- +`, `**` (right associative), primaries.

use crate::domain::error::ParseError;
use crate::domain::expr::{BinaryOp, Builtin, CompareOp, Expr, UnaryOp};

/// Maximum nesting of parentheses, unary operators and calls.
pub const MAX_DEPTH: usize = 64;
/// Maximum accepted source length in bytes.
pub const MAX_LENGTH: usize = 4096;

const RESERVED: [&str; 5] = ["and", "or", "not", "true", "false"];

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(format!(
                "expression nested deeper than {} levels",
                MAX_DEPTH
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn is_ident_char(ch: char) -> bool {
        ch.is_ascii_alphanumeric() || ch == '_'
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .map(Self::is_ident_char)
                .unwrap_or(false)
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn consume_exact(&mut self, s: &str) -> bool {
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        match self.peek() {
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {}
            Some(ch) => return Err(self.error(format!("expected identifier, found '{}'", ch))),
            None => return Err(self.error("expected identifier, found end of input")),
        }
        while let Some(ch) = self.peek() {
            if Self::is_ident_char(ch) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn parse_connective(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_or()?;
        loop {
            self.skip_whitespace();
            let func = match self.peek() {
                Some('→') => Builtin::Implies,
                Some('↔') => Builtin::Iff,
                Some('⊕') => Builtin::Xor,
                Some('↑') => Builtin::Nand,
                Some('↓') => Builtin::Nor,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_or()?;
            left = Expr::Call {
                func,
                args: vec![left, right],
            };
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_whitespace();
            if self.consume_keyword("or") || self.consume_exact("||") {
                let right = self.parse_and()?;
                left = Expr::Or(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        loop {
            self.skip_whitespace();
            if self.consume_keyword("and") || self.consume_exact("&&") {
                let right = self.parse_not()?;
                left = Expr::And(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        let negated = if self.consume_keyword("not") {
            true
        } else if self.remaining().starts_with('!') && !self.remaining().starts_with("!=") {
            self.advance();
            true
        } else {
            false
        };

        if !negated {
            return self.parse_comparison();
        }
        self.enter()?;
        let operand = self.parse_not()?;
        self.leave();
        Ok(Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        })
    }

    fn parse_compare_op(&mut self) -> Result<Option<CompareOp>, ParseError> {
        self.skip_whitespace();
        let op = if self.consume_exact("<=") {
            CompareOp::Le
        } else if self.consume_exact(">=") {
            CompareOp::Ge
        } else if self.consume_exact("==") {
            CompareOp::Eq
        } else if self.consume_exact("!=") {
            CompareOp::Ne
        } else if self.consume_exact("<") {
            CompareOp::Lt
        } else if self.consume_exact(">") {
            CompareOp::Gt
        } else if self.remaining().starts_with('=') {
            return Err(self.error("assignment '=' is not allowed in an expression"));
        } else {
            return Ok(None);
        };
        Ok(Some(op))
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.parse_compare_op()? {
            rest.push((op, self.parse_additive()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let op = match self.peek() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let op = if self.remaining().starts_with("**") {
                return Ok(left);
            } else {
                match self.peek() {
                    Some('*') => BinaryOp::Mul,
                    Some('/') => BinaryOp::Div,
                    Some('%') => BinaryOp::Rem,
                    _ => return Ok(left),
                }
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        let op = match self.peek() {
            Some('-') => UnaryOp::Neg,
            Some('+') => UnaryOp::Plus,
            _ => return self.parse_power(),
        };
        self.advance();
        self.enter()?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        self.skip_whitespace();
        if !self.consume_exact("**") {
            return Ok(base);
        }
        self.enter()?;
        let exponent = self.parse_unary()?;
        self.leave();
        Ok(Expr::Binary {
            op: BinaryOp::Pow,
            left: Box::new(base),
            right: Box::new(exponent),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_primary()?;
        self.skip_whitespace();
        match self.peek() {
            Some('.') => Err(self.error("attribute access is not allowed")),
            Some('[') => Err(self.error("indexing is not allowed")),
            Some('(') => Err(self.error("only builtin functions can be called")),
            _ => Ok(expr),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        let ch = match self.peek() {
            Some(ch) => ch,
            None => return Err(self.error("unexpected end of input")),
        };

        if ch.is_ascii_digit() {
            return self.parse_number().map(Expr::Number);
        }
        if ch == '.' {
            let next_is_digit = self.remaining()[1..]
                .chars()
                .next()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false);
            if next_is_digit {
                return self.parse_number().map(Expr::Number);
            }
            return Err(self.error("attribute access is not allowed"));
        }
        if ch == '(' {
            self.advance();
            self.enter()?;
            let inner = self.parse_connective()?;
            self.expect_char(')')?;
            self.leave();
            return Ok(inner);
        }
        if ch == '"' || ch == '\'' {
            return self.parse_string(ch);
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            return self.parse_name();
        }
        Err(self.error(format!("unexpected character '{}'", ch)))
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                let next_is_digit = self.remaining()[1..]
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_digit())
                    .unwrap_or(false);
                if !next_is_digit {
                    break;
                }
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let mark = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            let mut exp_digits = 0;
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    exp_digits += 1;
                    self.advance();
                } else {
                    break;
                }
            }
            if exp_digits == 0 {
                self.pos = mark;
                return Err(self.error("malformed exponent in number"));
            }
        }

        let num_str = &self.input[start..self.pos];
        let value = num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })?;
        if !value.is_finite() {
            return Err(ParseError {
                message: format!("number out of range: {}", num_str),
                position: start,
            });
        }
        Ok(value)
    }

    fn parse_string(&mut self, quote: char) -> Result<Expr, ParseError> {
        let start = self.pos;
        self.advance();
        let body_start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == quote {
                let text = self.input[body_start..self.pos].to_string();
                self.advance();
                return Ok(Expr::Text(text));
            }
            self.advance();
        }
        Err(ParseError {
            message: "unterminated string literal".to_string(),
            position: start,
        })
    }

    fn parse_name(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        let name = self.parse_identifier()?;
        match name.as_str() {
            "true" => return Ok(Expr::Bool(true)),
            "false" => return Ok(Expr::Bool(false)),
            "and" | "or" | "not" => {
                return Err(ParseError {
                    message: format!("unexpected keyword '{}'", name),
                    position: start,
                });
            }
            _ => {}
        }

        self.skip_whitespace();
        if self.peek() != Some('(') {
            return Ok(Expr::Variable(name));
        }

        let func = Builtin::from_name(&name).ok_or_else(|| ParseError {
            message: format!("function '{}' is not allowed", name),
            position: start,
        })?;
        self.advance();
        self.enter()?;

        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
        } else {
            loop {
                args.push(self.parse_connective()?);
                self.skip_whitespace();
                if self.peek() == Some(')') {
                    self.advance();
                    break;
                }
                self.expect_char(',')?;
            }
        }
        self.leave();

        let (min, max) = func.arity();
        if args.len() < min || max.map(|m| args.len() > m).unwrap_or(false) {
            let expected = match max {
                Some(m) if m == min => format!("{}", min),
                Some(m) => format!("{} to {}", min, m),
                None => format!("at least {}", min),
            };
            return Err(ParseError {
                message: format!(
                    "{}() takes {} argument(s), got {}",
                    func.name(),
                    expected,
                    args.len()
                ),
                position: start,
            });
        }

        Ok(Expr::Call { func, args })
    }

    fn check_source(&self) -> Result<(), ParseError> {
        if self.input.len() > MAX_LENGTH {
            return Err(ParseError {
                message: format!("expression longer than {} bytes", MAX_LENGTH),
                position: MAX_LENGTH,
            });
        }
        if self.input.trim().is_empty() {
            return Err(ParseError {
                message: "empty expression".to_string(),
                position: 0,
            });
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        self.skip_whitespace();
        if self.pos < self.input.len() {
            if self.remaining().starts_with('=') {
                return Err(self.error("assignment '=' is not allowed in an expression"));
            }
            return Err(self.error(format!(
                "unexpected input after expression: '{}'",
                self.remaining()
            )));
        }
        Ok(())
    }

    fn parse(&mut self) -> Result<Expr, ParseError> {
        self.check_source()?;
        let expr = self.parse_connective()?;
        self.finish()?;
        Ok(expr)
    }

    fn parse_assignment(&mut self) -> Result<(String, Expr), ParseError> {
        self.check_source()?;
        let start = self.pos;
        let target = self.parse_identifier()?;
        if RESERVED.contains(&target.as_str()) || Builtin::from_name(&target).is_some() {
            return Err(ParseError {
                message: format!("'{}' cannot be assigned to", target),
                position: start,
            });
        }
        self.skip_whitespace();
        if self.remaining().starts_with("==") || !self.consume_exact("=") {
            return Err(self.error(format!("expected '=' after '{}'", target)));
        }
        let expr = self.parse_connective()?;
        self.finish()?;
        Ok((target, expr))
    }
}

/// Parse a single expression.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}

/// Parse a statement of the form `name = expression`.
pub fn parse_assignment(input: &str) -> Result<(String, Expr), ParseError> {
    let mut parser = Parser::new(input);
    parser.parse_assignment()
}

/// Whether `name` is usable as a variable binding target.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    head_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name)
        && Builtin::from_name(name).is_none()
}
