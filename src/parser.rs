//! Recursive-descent, precedence-climbing parser. Owns no state beyond the
//! lexer.

use crate::ast::*;
use crate::error::Error;
use crate::lexer::Lexer;
use crate::token::TokenKind;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
}

/// `l0..l10` binary precedence ladder, loosely matching C. Lower binds
/// tighter; `l10` (assignment) is the loosest and right-associative.
const LEVELS: &[&[(TokenKind, BinaryOp)]] = &[
    // l3
    &[
        (TokenKind::Star, BinaryOp::Multiply),
        (TokenKind::Slash, BinaryOp::Divide),
        (TokenKind::Percent, BinaryOp::Modulo),
    ],
    // l4
    &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Subtract)],
    // l5
    &[(TokenKind::Shl, BinaryOp::Shl), (TokenKind::Shr, BinaryOp::Shr)],
    // l6
    &[
        (TokenKind::Amp, BinaryOp::BitAnd),
        (TokenKind::Pipe, BinaryOp::BitOr),
        (TokenKind::Caret, BinaryOp::BitXor),
    ],
    // l7
    &[
        (TokenKind::EqEq, BinaryOp::Equal),
        (TokenKind::NotEq, BinaryOp::NotEqual),
        (TokenKind::Less, BinaryOp::Less),
        (TokenKind::Greater, BinaryOp::Greater),
        (TokenKind::LessEq, BinaryOp::LessOrEqual),
        (TokenKind::GreaterEq, BinaryOp::GreaterOrEqual),
    ],
    // l8
    &[(TokenKind::AmpAmp, BinaryOp::And)],
    // l9
    &[(TokenKind::PipePipe, BinaryOp::Or)],
];

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Parser { lexer: Lexer::new(src) }
    }

    pub fn parse_module(&mut self) -> Result<Module, Error> {
        let mut decls = Vec::new();
        while !self.lexer.eof()? {
            decls.push(self.parse_function_decl()?);
        }
        Ok(Module { decls })
    }

    fn parse_function_decl(&mut self) -> Result<FunctionDecl, Error> {
        let begin = self.lexer.expect(TokenKind::Fn)?.begin;
        let name = self.lexer.expect(TokenKind::Identifier)?.text;
        self.lexer.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if self.lexer.try_match(TokenKind::RParen)?.is_none() {
            loop {
                let pname = self.lexer.expect(TokenKind::Identifier)?.text;
                self.lexer.expect(TokenKind::Colon)?;
                let type_expr = self.parse_type_expr()?;
                params.push(Param { name: pname, type_expr });
                if self.lexer.try_match(TokenKind::Comma)?.is_some() {
                    continue;
                }
                break;
            }
            self.lexer.expect(TokenKind::RParen)?;
        }
        let result_type = if self.lexer.try_match(TokenKind::Colon)?.is_some() {
            self.parse_type_expr()?
        } else {
            TypeExpr::Named("void".to_string())
        };
        let body = self.parse_block()?;
        let end = body.span().end;
        Ok(FunctionDecl {
            span: Span { begin, end },
            name,
            result_type,
            params,
            body,
            locals: Vec::new(),
            mangled_name: None,
        })
    }

    /// An identifier optionally followed by a postfix chain of `*`
    /// (pointer) and `[]` (array), left-associative: `T*[]` is an array of
    /// pointers to `T`.
    fn parse_type_expr(&mut self) -> Result<TypeExpr, Error> {
        let name = self.lexer.expect(TokenKind::Identifier)?.text;
        let mut ty = TypeExpr::Named(name);
        loop {
            if self.lexer.try_match(TokenKind::Star)?.is_some() {
                ty = TypeExpr::Pointer(Box::new(ty));
                continue;
            }
            if self.lexer.try_match(TokenKind::LBracket)?.is_some() {
                self.lexer.expect(TokenKind::RBracket)?;
                ty = TypeExpr::Array(Box::new(ty));
                continue;
            }
            break;
        }
        Ok(ty)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Error> {
        if self.lexer.try_match(TokenKind::LBrace)?.is_some() {
            return self.parse_block_body();
        }
        if let Some(tok) = self.lexer.try_match(TokenKind::Let)? {
            return self.parse_var(tok.begin);
        }
        if let Some(tok) = self.lexer.try_match(TokenKind::Return)? {
            let expr = self.parse_expr()?;
            let end = expr.span().end;
            return Ok(Stmt::Return {
                span: Span { begin: tok.begin, end },
                expr,
            });
        }
        if let Some(tok) = self.lexer.try_match(TokenKind::While)? {
            self.lexer.expect(TokenKind::LParen)?;
            let cond = self.parse_expr()?;
            self.lexer.expect(TokenKind::RParen)?;
            let body = self.parse_stmt()?;
            let end = body.span().end;
            return Ok(Stmt::While {
                span: Span { begin: tok.begin, end },
                cond,
                body: Box::new(body),
            });
        }
        if let Some(tok) = self.lexer.try_match(TokenKind::If)? {
            self.lexer.expect(TokenKind::LParen)?;
            let cond = self.parse_expr()?;
            self.lexer.expect(TokenKind::RParen)?;
            let then_branch = self.parse_stmt()?;
            let mut end = then_branch.span().end;
            let else_branch = if self.lexer.try_match(TokenKind::Else)?.is_some() {
                let e = self.parse_stmt()?;
                end = e.span().end;
                Some(Box::new(e))
            } else {
                None
            };
            return Ok(Stmt::If {
                span: Span { begin: tok.begin, end },
                cond,
                then_branch: Box::new(then_branch),
                else_branch,
            });
        }
        let expr = self.parse_expr()?;
        let span = expr.span();
        Ok(Stmt::Expr { span, expr })
    }

    fn parse_block(&mut self) -> Result<Stmt, Error> {
        self.lexer.expect(TokenKind::LBrace)?;
        self.parse_block_body()
    }

    /// Parses the statement sequence of a block whose opening `{` has
    /// already been consumed.
    fn parse_block_body(&mut self) -> Result<Stmt, Error> {
        let mut stmts = Vec::new();
        let mut end;
        loop {
            if let Some(tok) = self.lexer.try_match(TokenKind::RBrace)? {
                end = tok.end;
                break;
            }
            stmts.push(self.parse_stmt()?);
        }
        let begin = stmts.first().map(|s| s.span().begin).unwrap_or(end);
        if stmts.is_empty() {
            end = begin;
        }
        Ok(Stmt::Block {
            span: Span { begin, end },
            stmts,
        })
    }

    /// `let name = expr (, name = expr)*`
    fn parse_var(&mut self, begin: usize) -> Result<Stmt, Error> {
        let mut names = Vec::new();
        let mut inits = Vec::new();
        loop {
            names.push(self.lexer.expect(TokenKind::Identifier)?.text);
            self.lexer.expect(TokenKind::Assign)?;
            inits.push(self.parse_expr()?);
            if self.lexer.try_match(TokenKind::Comma)?.is_some() {
                continue;
            }
            break;
        }
        let end = inits.last().unwrap().span().end;
        Ok(Stmt::Var {
            span: Span { begin, end },
            names,
            inits,
        })
    }

    // --- expressions --------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, Error> {
        self.parse_assign()
    }

    /// l10: `=`, right-associative.
    fn parse_assign(&mut self) -> Result<Expr, Error> {
        let lhs = self.parse_level(0)?;
        if self.lexer.try_match(TokenKind::Assign)?.is_some() {
            let rhs = self.parse_assign()?;
            let span = Span {
                begin: lhs.span().begin,
                end: rhs.span().end,
            };
            return Ok(Expr::Binary {
                span,
                op: BinaryOp::Assign,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                ty: None,
            });
        }
        Ok(lhs)
    }

    /// l3..l9, left-associative, climbing `LEVELS` by index.
    fn parse_level(&mut self, level: usize) -> Result<Expr, Error> {
        if level >= LEVELS.len() {
            return self.parse_unary();
        }
        let mut lhs = self.parse_level(level + 1)?;
        'outer: loop {
            for &(kind, op) in LEVELS[level] {
                if self.lexer.try_match(kind)?.is_some() {
                    let rhs = self.parse_level(level + 1)?;
                    let span = Span {
                        begin: lhs.span().begin,
                        end: rhs.span().end,
                    };
                    lhs = Expr::Binary {
                        span,
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        ty: None,
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    /// l2: unary `+ - ! ~`, right-associative.
    fn parse_unary(&mut self) -> Result<Expr, Error> {
        let unary_ops: &[(TokenKind, UnaryOp)] = &[
            (TokenKind::Plus, UnaryOp::Positive),
            (TokenKind::Minus, UnaryOp::Negative),
            (TokenKind::Bang, UnaryOp::Not),
            (TokenKind::Tilde, UnaryOp::BitNot),
        ];
        for &(kind, op) in unary_ops {
            if let Some(tok) = self.lexer.try_match(kind)? {
                let operand = self.parse_unary()?;
                let span = Span {
                    begin: tok.begin,
                    end: operand.span().end,
                };
                return Ok(Expr::Unary {
                    span,
                    op,
                    operand: Box::new(operand),
                    ty: None,
                });
            }
        }
        self.parse_postfix()
    }

    /// l1: call `f(...)`, index `e[...]`, left-associative postfix chain.
    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.lexer.try_match(TokenKind::LParen)?.is_some() {
                let mut args = Vec::new();
                if self.lexer.try_match(TokenKind::RParen)?.is_none() {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.lexer.try_match(TokenKind::Comma)?.is_some() {
                            continue;
                        }
                        break;
                    }
                    let end = self.lexer.expect(TokenKind::RParen)?.end;
                    let span = Span { begin: expr.span().begin, end };
                    expr = Expr::Call {
                        span,
                        callee: Box::new(expr),
                        args,
                        mangled_name: None,
                        ty: None,
                    };
                    continue;
                }
                let span = Span {
                    begin: expr.span().begin,
                    end: expr.span().end,
                };
                expr = Expr::Call {
                    span,
                    callee: Box::new(expr),
                    args,
                    mangled_name: None,
                    ty: None,
                };
                continue;
            }
            if self.lexer.try_match(TokenKind::LBracket)?.is_some() {
                let mut args = Vec::new();
                loop {
                    args.push(self.parse_expr()?);
                    if self.lexer.try_match(TokenKind::Comma)?.is_some() {
                        continue;
                    }
                    break;
                }
                let end = self.lexer.expect(TokenKind::RBracket)?.end;
                let span = Span { begin: expr.span().begin, end };
                expr = Expr::Index {
                    span,
                    value: Box::new(expr),
                    args,
                    ty: None,
                };
                continue;
            }
            break;
        }
        Ok(expr)
    }

    /// l0: parenthesized expr, integer literal, identifier.
    fn parse_primary(&mut self) -> Result<Expr, Error> {
        if self.lexer.try_match(TokenKind::LParen)?.is_some() {
            let inner = self.parse_expr()?;
            self.lexer.expect(TokenKind::RParen)?;
            return Ok(inner);
        }
        if let Some(tok) = self.lexer.try_match(TokenKind::Integer)? {
            return Ok(Expr::Integer {
                span: Span { begin: tok.begin, end: tok.end },
                text: tok.text,
                ty: None,
            });
        }
        let tok = self.lexer.expect(TokenKind::Identifier)?;
        Ok(Expr::Identifier {
            span: Span { begin: tok.begin, end: tok.end },
            text: tok.text,
            ty: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Expr {
        Parser::new(src).parse_expr().unwrap()
    }

    #[test]
    fn multiplicative_binds_tighter_than_additive() {
        // x + y * z parses as x + (y * z)
        let expr = parse("x + y * z");
        match expr {
            Expr::Binary { op: BinaryOp::Add, rhs, .. } => match *rhs {
                Expr::Binary { op: BinaryOp::Multiply, .. } => {}
                other => panic!("expected Multiply on the right, got {:?}", other),
            },
            other => panic!("expected Add at the top, got {:?}", other),
        }
    }

    #[test]
    fn assignment_is_right_associative() {
        // x = y = z parses as x = (y = z)
        let expr = parse("x = y = z");
        match expr {
            Expr::Binary { op: BinaryOp::Assign, rhs, .. } => match *rhs {
                Expr::Binary { op: BinaryOp::Assign, .. } => {}
                other => panic!("expected nested Assign, got {:?}", other),
            },
            other => panic!("expected Assign at the top, got {:?}", other),
        }
    }

    #[test]
    fn postfix_call_and_index_chain() {
        let expr = parse("f(1)[2]");
        match expr {
            Expr::Index { value, .. } => match *value {
                Expr::Call { .. } => {}
                other => panic!("expected Call nested under Index, got {:?}", other),
            },
            other => panic!("expected Index at the top, got {:?}", other),
        }
    }

    #[test]
    fn function_with_array_of_pointers_return_type() {
        let module = Parser::new("fn f(): i64*[] { return 0 }").parse_module().unwrap();
        match &module.decls[0].result_type {
            TypeExpr::Array(base) => match base.as_ref() {
                TypeExpr::Pointer(_) => {}
                other => panic!("expected Pointer under Array, got {:?}", other),
            },
            other => panic!("expected Array result type, got {:?}", other),
        }
    }
}
