//! Recursive-descent parser for the formula grammar.
//!
//! ```text
//! expr    := term   (('+' | '-') term)*
//! term    := unary  (('*' | '/' | '%') unary)*
//! unary   := '-' unary | power
//! power   := primary ('^' unary)?            // right-associative
//! primary := Number | Ident '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use super::FormulaError;
use super::lexer::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

pub fn parse(tokens: &[Token]) -> Result<Expr, FormulaError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(FormulaError::Parse(format!(
            "unexpected trailing token at position {}",
            parser.pos
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), FormulaError> {
        match self.bump() {
            Some(t) if t == expected => Ok(()),
            other => Err(FormulaError::Parse(format!(
                "expected {expected:?} {context}, found {other:?}"
            ))),
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.bump();
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.primary()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.bump();
            // Right-associative: the exponent re-enters at unary level so
            // `2 ^ -3` and `2 ^ 3 ^ 2` both parse naturally.
            let exponent = self.unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.bump().cloned() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                self.expect(&Token::RParen, "to close group")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                self.expect(&Token::LParen, &format!("after function name '{name}'"))?;
                let mut args = vec![self.expr()?];
                while matches!(self.peek(), Some(Token::Comma)) {
                    self.bump();
                    args.push(self.expr()?);
                }
                self.expect(&Token::RParen, "to close argument list")?;
                Ok(Expr::Call {
                    function: name,
                    args,
                })
            }
            other => Err(FormulaError::Parse(format!(
                "expected a number, group, or function call, found {other:?}"
            ))),
        }
    }
}
