//! Recursive-descent parser over the token stream produced by the lexer.

use super::ast::*;
use super::error::{SyntaxError, SyntaxErrorKind};
use super::lexer::{lex, Keyword, Token};
use super::span::{Span, Spanned};

/// Parse query text into a [`QueryAst`].
pub fn parse(text: &str) -> Result<QueryAst, SyntaxError> {
    let tokens = lex(text)?;
    let mut parser = Parser {
        source: text,
        tokens,
        pos: 0,
        anonymous: 0,
    };
    let statement = parser.statement()?;
    if parser.peek().is_some() {
        return Err(parser.unexpected("end of query"));
    }
    Ok(QueryAst {
        source: text.to_string(),
        statement,
    })
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token<'a>, Span)>,
    pos: usize,
    anonymous: u32,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).map(|(t, _)| *t)
    }

    fn peek_nth(&self, n: usize) -> Option<Token<'a>> {
        self.tokens.get(self.pos + n).map(|(t, _)| *t)
    }

    fn span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, span)) => span.clone(),
            None => self.source.len()..self.source.len(),
        }
    }

    fn at_keyword(&self, keyword: Keyword) -> bool {
        self.peek() == Some(Token::Keyword(keyword))
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(Token::Keyword(keyword))
    }

    fn eat(&mut self, token: Token<'_>) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token<'_>) -> Result<Span, SyntaxError> {
        if self.peek() == Some(token) {
            let span = self.span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.unexpected(&format!("'{token}'")))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Span, SyntaxError> {
        self.expect(Token::Keyword(keyword))
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        match self.peek() {
            Some(found) => SyntaxError::new(
                SyntaxErrorKind::UnexpectedToken,
                format!("expected {expected}, found '{found}'"),
                self.span(),
            ),
            None => SyntaxError::new(
                SyntaxErrorKind::UnexpectedEnd,
                format!("expected {expected}, found end of query"),
                self.span(),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<Statement, SyntaxError> {
        match self.peek() {
            Some(Token::Keyword(Keyword::Select | Keyword::From)) => {
                self.select().map(Statement::Select)
            }
            Some(Token::Keyword(Keyword::Update)) => self.update().map(Statement::Update),
            Some(Token::Keyword(Keyword::Delete)) => self.delete().map(Statement::Delete),
            _ => Err(self.unexpected("SELECT, FROM, UPDATE or DELETE")),
        }
    }

    fn select(&mut self) -> Result<SelectStatement, SyntaxError> {
        let mut distinct = false;
        let mut selections = Vec::new();
        if self.eat_keyword(Keyword::Select) {
            distinct = self.eat_keyword(Keyword::Distinct);
            loop {
                let expr = self.expr()?;
                let alias = self.alias()?.map(|a| a.value);
                selections.push(Selection { expr, alias });
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }

        self.expect_keyword(Keyword::From)?;
        let mut from = vec![self.entity_ref()?];
        while self.eat(Token::Comma) {
            from.push(self.entity_ref()?);
        }

        let mut joins = Vec::new();
        while let Some(join) = self.join()? {
            joins.push(join);
        }

        let where_clause = self.where_clause()?;

        let mut group_by = Vec::new();
        if self.eat_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            group_by = self.expr_list()?;
        }

        let having = if self.eat_keyword(Keyword::Having) {
            Some(self.expr()?)
        } else {
            None
        };

        let mut order_by = Vec::new();
        if self.eat_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            loop {
                let expr = self.expr()?;
                let descending = if self.eat_keyword(Keyword::Desc) {
                    true
                } else {
                    self.eat_keyword(Keyword::Asc);
                    false
                };
                order_by.push(OrderItem { expr, descending });
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }

        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.unsigned()?)
        } else {
            None
        };
        let offset = if self.eat_keyword(Keyword::Offset) {
            Some(self.unsigned()?)
        } else {
            None
        };

        Ok(SelectStatement {
            distinct,
            selections,
            from,
            joins,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn join(&mut self) -> Result<Option<Join>, SyntaxError> {
        let kind = if self.eat_keyword(Keyword::Inner) {
            self.expect_keyword(Keyword::Join)?;
            JoinKind::Inner
        } else if self.eat_keyword(Keyword::Left) {
            self.eat_keyword(Keyword::Outer);
            self.expect_keyword(Keyword::Join)?;
            JoinKind::Left
        } else if self.eat_keyword(Keyword::Join) {
            JoinKind::Inner
        } else {
            return Ok(None);
        };
        let fetch = self.eat_keyword(Keyword::Fetch);
        let target = self.path()?;
        let alias = self.alias()?;
        let condition = if self.eat_keyword(Keyword::On) || self.eat_keyword(Keyword::With) {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Some(Join {
            kind,
            fetch,
            target,
            alias,
            condition,
        }))
    }

    fn update(&mut self) -> Result<UpdateStatement, SyntaxError> {
        self.expect_keyword(Keyword::Update)?;
        let target = self.entity_ref()?;
        self.expect_keyword(Keyword::Set)?;
        let mut assignments = Vec::new();
        loop {
            let path = self.path()?;
            self.expect(Token::Eq)?;
            let value = self.expr()?;
            assignments.push(Assignment { path, value });
            if !self.eat(Token::Comma) {
                break;
            }
        }
        let where_clause = self.where_clause()?;
        Ok(UpdateStatement {
            target,
            assignments,
            where_clause,
        })
    }

    fn delete(&mut self) -> Result<DeleteStatement, SyntaxError> {
        self.expect_keyword(Keyword::Delete)?;
        self.eat_keyword(Keyword::From);
        let target = self.entity_ref()?;
        let where_clause = self.where_clause()?;
        Ok(DeleteStatement {
            target,
            where_clause,
        })
    }

    fn where_clause(&mut self) -> Result<Option<Expr>, SyntaxError> {
        if self.eat_keyword(Keyword::Where) {
            Ok(Some(self.expr()?))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn entity_ref(&mut self) -> Result<EntityRef, SyntaxError> {
        let name = self.entity_name()?;
        let alias = self.alias()?;
        Ok(EntityRef { name, alias })
    }

    /// `Employee`, `com.acme.Employee` or `` `Employee` ``.
    fn entity_name(&mut self) -> Result<Spanned<String>, SyntaxError> {
        match self.peek() {
            Some(Token::QuotedIdent(name)) => {
                let span = self.span();
                self.pos += 1;
                Ok(Spanned::new(name.to_string(), span))
            }
            Some(Token::Ident(_)) => {
                let path = self.path()?;
                Ok(Spanned::new(path.segments.join("."), path.span))
            }
            _ => Err(self.unexpected("entity name")),
        }
    }

    fn alias(&mut self) -> Result<Option<Spanned<String>>, SyntaxError> {
        let explicit = self.eat_keyword(Keyword::As);
        if let Some(Token::Ident(name)) = self.peek() {
            let span = self.span();
            self.pos += 1;
            return Ok(Some(Spanned::new(name.to_string(), span)));
        }
        if explicit {
            return Err(self.unexpected("alias"));
        }
        Ok(None)
    }

    /// Segment text; keywords are valid segments after a dot.
    fn segment(&self, token: Token<'a>, span: &Span, after_dot: bool) -> Option<String> {
        match token {
            Token::Ident(name) | Token::QuotedIdent(name) => Some(name.to_string()),
            Token::Keyword(_) if after_dot => self.source.get(span.clone()).map(str::to_string),
            _ => None,
        }
    }

    fn path(&mut self) -> Result<Path, SyntaxError> {
        let start = self.span();
        let first = self
            .peek()
            .and_then(|tok| self.segment(tok, &start, false))
            .ok_or_else(|| self.unexpected("path"))?;
        self.pos += 1;

        let mut segments = vec![first];
        let mut end = start.end;
        while self.peek() == Some(Token::Dot) {
            let span = match self.tokens.get(self.pos + 1) {
                Some((tok, span)) => match self.segment(*tok, span, true) {
                    Some(segment) => {
                        segments.push(segment);
                        span.clone()
                    }
                    None => break,
                },
                None => break,
            };
            self.pos += 2;
            end = span.end;
        }
        if self.peek() == Some(Token::Dot) {
            self.pos += 1;
            return Err(self.unexpected("path segment"));
        }

        Ok(Path {
            segments,
            span: start.start..end,
        })
    }

    fn unsigned(&mut self) -> Result<u64, SyntaxError> {
        match self.peek() {
            Some(Token::Number(text)) if !text.contains('.') => {
                let span = self.span();
                self.pos += 1;
                text.parse().map_err(|_| {
                    SyntaxError::new(
                        SyntaxErrorKind::UnexpectedToken,
                        format!("number out of range: {text}"),
                        span,
                    )
                })
            }
            _ => Err(self.unexpected("integer")),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr_list(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        let mut list = vec![self.expr()?];
        while self.eat(Token::Comma) {
            list.push(self.expr()?);
        }
        Ok(list)
    }

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.and()?;
            left = binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.not()?;
            left = binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_keyword(Keyword::Not) {
            let expr = self.not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.additive()?;

        let comparison = match self.peek() {
            Some(Token::Eq) => Some(BinaryOp::Eq),
            Some(Token::Ne) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Lte) => Some(BinaryOp::Lte),
            Some(Token::Gte) => Some(BinaryOp::Gte),
            _ => None,
        };
        if let Some(op) = comparison {
            self.pos += 1;
            let right = self.additive()?;
            return Ok(binary(left, op, right));
        }

        if self.eat_keyword(Keyword::Is) {
            let negated = self.eat_keyword(Keyword::Not);
            self.expect_keyword(Keyword::Null)?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = self.at_keyword(Keyword::Not)
            && matches!(
                self.peek_nth(1),
                Some(Token::Keyword(Keyword::Like | Keyword::In | Keyword::Between))
            );
        if negated {
            self.pos += 1;
        }

        if self.eat_keyword(Keyword::Like) {
            let pattern = self.additive()?;
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            });
        }
        if self.eat_keyword(Keyword::In) {
            self.expect(Token::LParen)?;
            let list = self.expr_list()?;
            self.expect(Token::RParen)?;
            return Ok(Expr::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }
        if self.eat_keyword(Keyword::Between) {
            let low = self.additive()?;
            self.expect_keyword(Keyword::And)?;
            let high = self.additive()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }

        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                Some(Token::Concat) => BinaryOp::Concat,
                _ => break,
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(Token::Minus) {
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.span();
        let Some(token) = self.peek() else {
            return Err(self.unexpected("expression"));
        };

        let literal = match token {
            Token::StringLit(raw) => Some(Literal::String(raw.replace("''", "'"))),
            Token::Number(text) if text.contains('.') => {
                Some(Literal::Decimal(text.parse().map_err(|_| {
                    SyntaxError::new(
                        SyntaxErrorKind::UnexpectedToken,
                        format!("invalid number: {text}"),
                        span.clone(),
                    )
                })?))
            }
            Token::Number(text) => Some(Literal::Integer(text.parse().map_err(|_| {
                SyntaxError::new(
                    SyntaxErrorKind::UnexpectedToken,
                    format!("integer out of range: {text}"),
                    span.clone(),
                )
            })?)),
            Token::Keyword(Keyword::True) => Some(Literal::Boolean(true)),
            Token::Keyword(Keyword::False) => Some(Literal::Boolean(false)),
            Token::Keyword(Keyword::Null) => Some(Literal::Null),
            _ => None,
        };
        if let Some(literal) = literal {
            self.pos += 1;
            return Ok(Expr::Literal(literal));
        }

        match token {
            Token::NamedParam(name) => {
                self.pos += 1;
                Ok(Expr::Parameter(Parameter::Named(name.to_string())))
            }
            Token::PositionalParam(Some(index)) => {
                self.pos += 1;
                let index = index.parse().map_err(|_| {
                    SyntaxError::new(
                        SyntaxErrorKind::UnexpectedToken,
                        format!("parameter position out of range: {index}"),
                        span,
                    )
                })?;
                Ok(Expr::Parameter(Parameter::Positional(index)))
            }
            Token::PositionalParam(None) => {
                self.pos += 1;
                self.anonymous += 1;
                Ok(Expr::Parameter(Parameter::Anonymous(self.anonymous)))
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Token::Ident(name) if self.peek_nth(1) == Some(Token::LParen) => {
                self.pos += 2;
                self.function(name)
            }
            Token::Ident(_) | Token::QuotedIdent(_) => Ok(Expr::Path(self.path()?)),
            _ => Err(self.unexpected("expression")),
        }
    }

    /// Call arguments, after `name(` has been consumed.
    fn function(&mut self, name: &str) -> Result<Expr, SyntaxError> {
        if name.eq_ignore_ascii_case("count") && self.eat(Token::Star) {
            self.expect(Token::RParen)?;
            return Ok(Expr::CountStar);
        }
        let distinct = self.eat_keyword(Keyword::Distinct);
        let args = if self.peek() == Some(Token::RParen) {
            Vec::new()
        } else {
            self.expr_list()?
        };
        self.expect(Token::RParen)?;
        Ok(Expr::Function {
            name: name.to_string(),
            distinct,
            args,
        })
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}
