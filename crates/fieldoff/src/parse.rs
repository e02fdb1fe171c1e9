use crate::ast::*;
use crate::lex::{Kw, Span, TokKind, Token};

/// Deepest `*`/`[..]` nesting accepted in a member type.
pub const MAX_TYPE_DEPTH: usize = 256;

#[derive(Debug)]
pub struct ParseError {
    pub span: Span,
    pub msg: String,
}
impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.line, self.span.col, self.msg)
    }
}
impl std::error::Error for ParseError {}
fn perr(span: Span, msg: impl Into<String>) -> ParseError {
    ParseError {
        span,
        msg: msg.into(),
    }
}

pub fn parse_program(tokens: &[Token]) -> Result<Program, ParseError> {
    if tokens.is_empty() {
        return Ok(Program::default());
    }
    let mut p = Parser { tokens, i: 0 };
    let mut structs = Vec::new();
    while !p.at_eof() {
        match p.peek().kind {
            TokKind::Kw(Kw::Struct) => structs.push(p.parse_struct()?),
            _ => {
                let t = p.peek();
                return Err(perr(t.span, format!("expected struct, got {:?}", t.kind)));
            }
        }
    }
    Ok(Program { structs })
}

struct Parser<'a> {
    tokens: &'a [Token],
    i: usize,
}
impl<'a> Parser<'a> {
    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokKind::Eof)
    }
    fn peek(&self) -> &'a Token {
        // lex_str always terminates the stream with Eof
        &self.tokens[self.i.min(self.tokens.len() - 1)]
    }
    fn next(&mut self) -> &'a Token {
        let t = self.peek();
        self.i = (self.i + 1).min(self.tokens.len());
        t
    }

    fn expect(&mut self, kind: TokKind) -> Result<Span, ParseError> {
        let t = self.peek();
        if t.kind == kind {
            self.next();
            Ok(t.span)
        } else {
            Err(perr(
                t.span,
                format!("expected {:?}, got {:?}", kind, t.kind),
            ))
        }
    }

    fn take_ident(&mut self) -> Result<(String, Span), ParseError> {
        let t = self.peek();
        match &t.kind {
            TokKind::Ident(s) => {
                self.next();
                Ok((s.clone(), t.span))
            }
            other => Err(perr(t.span, format!("expected identifier, got {other:?}"))),
        }
    }

    fn parse_struct(&mut self) -> Result<StructDef, ParseError> {
        let sp = self.expect(TokKind::Kw(Kw::Struct))?;
        let (name, _) = self.take_ident()?;

        if self.peek().kind == TokKind::Semi {
            self.next();
            return Ok(StructDef {
                name,
                fields: None,
                span: sp,
            });
        }

        self.expect(TokKind::LBrace)?;
        let mut fields = Vec::new();
        while self.peek().kind != TokKind::RBrace {
            let (fname, fsp) = self.take_ident()?;
            self.expect(TokKind::Colon)?;
            let ty = self.parse_type(0)?;
            fields.push(FieldDef {
                name: fname,
                ty,
                span: fsp,
            });

            if self.peek().kind == TokKind::Comma {
                self.next();
                continue;
            }
            break;
        }
        self.expect(TokKind::RBrace)?;

        Ok(StructDef {
            name,
            fields: Some(fields),
            span: sp,
        })
    }

    fn parse_type(&mut self, depth: usize) -> Result<TypeExpr, ParseError> {
        if depth >= MAX_TYPE_DEPTH {
            return Err(perr(
                self.peek().span,
                format!("type nests deeper than {MAX_TYPE_DEPTH} levels"),
            ));
        }
        match self.peek().kind {
            TokKind::Star => {
                self.next();
                let inner = self.parse_type(depth + 1)?;
                Ok(TypeExpr::Ptr(Box::new(inner)))
            }
            TokKind::LBrack => {
                self.next();
                let elem = self.parse_type(depth + 1)?;
                self.expect(TokKind::Semi)?;
                let t = self.next();
                let len = match t.kind {
                    TokKind::Int(n) => n,
                    ref other => {
                        return Err(perr(t.span, format!("expected array length, got {other:?}")));
                    }
                };
                self.expect(TokKind::RBrack)?;
                Ok(TypeExpr::Array {
                    elem: Box::new(elem),
                    len,
                })
            }
            _ => {
                let (name, sp) = self.take_ident()?;
                Ok(TypeExpr::Named(name, sp))
            }
        }
    }
}
