use crate::{
    ast::{Block, Expr, ExprKind, InfixOp, PrefixOp, Program, Stmt, StmtKind},
    lexer::Lexer,
    token::{Token, TokenKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt => Precedence::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Asterisk | TokenKind::Slash => Precedence::Product,
        TokenKind::Lparen => Precedence::Call,
        TokenKind::Lbracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

/// Pratt parser over a two-token window. Errors are accumulated rather than
/// aborting; a failed statement re-synchronises at the next `;` or EOF.
pub struct Parser {
    lexer: Lexer,
    cur_token: Token,
    peek_token: Token,
    errors: Vec<String>,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Self {
        let mut parser = Parser {
            lexer,
            cur_token: Token::eof(),
            peek_token: Token::eof(),
            errors: Vec::new(),
        };
        parser.next_token();
        parser.next_token();
        parser
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn parse_program(&mut self) -> Program {
        let mut statements = Vec::new();

        while self.cur_token.kind != TokenKind::Eof {
            match self.parse_statement() {
                Some(stmt) => statements.push(stmt),
                None => self.synchronize(),
            }
            self.next_token();
        }

        Program { statements }
    }

    fn parse_statement(&mut self) -> Option<Stmt> {
        match self.cur_token.kind {
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Option<Stmt> {
        let token = self.cur_token.clone();

        if !self.expect_peek(TokenKind::Ident) {
            return None;
        }
        let name = self.cur_token.literal.clone();

        if !self.expect_peek(TokenKind::Assign) {
            return None;
        }
        self.next_token();

        let mut value = self.parse_expression(Precedence::Lowest)?;

        // Name the literal after its binding so it can call itself.
        if let ExprKind::FunctionLiteral {
            name: fn_name, ..
        } = &mut value.kind
        {
            *fn_name = name.clone();
        }

        if self.peek_token.kind == TokenKind::Semicolon {
            self.next_token();
        }

        Some(Stmt {
            kind: StmtKind::Let { name, value },
            token,
        })
    }

    fn parse_return_statement(&mut self) -> Option<Stmt> {
        let token = self.cur_token.clone();
        self.next_token();

        let value = self.parse_expression(Precedence::Lowest)?;

        if self.peek_token.kind == TokenKind::Semicolon {
            self.next_token();
        }

        Some(Stmt {
            kind: StmtKind::Return { value },
            token,
        })
    }

    fn parse_expression_statement(&mut self) -> Option<Stmt> {
        let token = self.cur_token.clone();
        let expr = self.parse_expression(Precedence::Lowest)?;

        if self.peek_token.kind == TokenKind::Semicolon {
            self.next_token();
        }

        Some(Stmt {
            kind: StmtKind::Expr { expr },
            token,
        })
    }

    // ----------------- EXPRESSIONS -----------------

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expr> {
        let mut left = self.parse_prefix()?;

        while self.peek_token.kind != TokenKind::Semicolon
            && precedence < precedence_of(self.peek_token.kind)
        {
            left = match self.peek_token.kind {
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Asterisk
                | TokenKind::Slash
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::Eq
                | TokenKind::NotEq => {
                    self.next_token();
                    self.parse_infix_expression(left)?
                }
                TokenKind::Lparen => {
                    self.next_token();
                    self.parse_call_expression(left)?
                }
                TokenKind::Lbracket => {
                    self.next_token();
                    self.parse_index_expression(left)?
                }
                _ => return Some(left),
            };
        }

        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expr> {
        let token = self.cur_token.clone();
        match token.kind {
            TokenKind::Ident => Some(Expr {
                kind: ExprKind::Ident(token.literal.clone()),
                token,
            }),
            TokenKind::Int => self.parse_integer_literal(),
            TokenKind::True | TokenKind::False => Some(Expr {
                kind: ExprKind::BoolLiteral(token.kind == TokenKind::True),
                token,
            }),
            TokenKind::Str => Some(Expr {
                kind: ExprKind::StringLiteral(token.literal.clone()),
                token,
            }),
            TokenKind::Bang | TokenKind::Minus => self.parse_prefix_expression(),
            TokenKind::Lparen => self.parse_grouped_expression(),
            TokenKind::If => self.parse_if_expression(),
            TokenKind::Function => self.parse_function_literal(),
            TokenKind::Lbracket => self.parse_array_literal(),
            TokenKind::Lbrace => self.parse_hash_literal(),
            kind => {
                self.errors.push(format!(
                    "no prefix parse function for {} found",
                    token_kind_display(kind)
                ));
                None
            }
        }
    }

    fn parse_integer_literal(&mut self) -> Option<Expr> {
        let token = self.cur_token.clone();
        match token.literal.parse::<i64>() {
            Ok(value) => Some(Expr {
                kind: ExprKind::IntLiteral(value),
                token,
            }),
            Err(_) => {
                self.errors
                    .push(format!("could not parse {:?} as integer", token.literal));
                None
            }
        }
    }

    fn parse_prefix_expression(&mut self) -> Option<Expr> {
        let token = self.cur_token.clone();
        let op = match token.kind {
            TokenKind::Bang => PrefixOp::Bang,
            _ => PrefixOp::Minus,
        };

        self.next_token();
        let right = self.parse_expression(Precedence::Prefix)?;

        Some(Expr {
            kind: ExprKind::Prefix {
                op,
                right: Box::new(right),
            },
            token,
        })
    }

    fn parse_infix_expression(&mut self, left: Expr) -> Option<Expr> {
        let token = self.cur_token.clone();
        let op = match token.kind {
            TokenKind::Plus => InfixOp::Add,
            TokenKind::Minus => InfixOp::Sub,
            TokenKind::Asterisk => InfixOp::Mul,
            TokenKind::Slash => InfixOp::Div,
            TokenKind::Lt => InfixOp::Lt,
            TokenKind::Gt => InfixOp::Gt,
            TokenKind::Eq => InfixOp::Eq,
            _ => InfixOp::NotEq,
        };

        let precedence = precedence_of(token.kind);
        self.next_token();
        let right = self.parse_expression(precedence)?;

        Some(Expr {
            kind: ExprKind::Infix {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            token,
        })
    }

    fn parse_grouped_expression(&mut self) -> Option<Expr> {
        self.next_token();
        let expr = self.parse_expression(Precedence::Lowest)?;

        if !self.expect_peek(TokenKind::Rparen) {
            return None;
        }
        Some(expr)
    }

    fn parse_if_expression(&mut self) -> Option<Expr> {
        let token = self.cur_token.clone();

        if !self.expect_peek(TokenKind::Lparen) {
            return None;
        }
        self.next_token();
        let condition = self.parse_expression(Precedence::Lowest)?;

        if !self.expect_peek(TokenKind::Rparen) {
            return None;
        }
        if !self.expect_peek(TokenKind::Lbrace) {
            return None;
        }
        let consequence = self.parse_block();

        let alternative = if self.peek_token.kind == TokenKind::Else {
            self.next_token();
            if !self.expect_peek(TokenKind::Lbrace) {
                return None;
            }
            Some(self.parse_block())
        } else {
            None
        };

        Some(Expr {
            kind: ExprKind::If {
                condition: Box::new(condition),
                consequence,
                alternative,
            },
            token,
        })
    }

    fn parse_function_literal(&mut self) -> Option<Expr> {
        let token = self.cur_token.clone();

        if !self.expect_peek(TokenKind::Lparen) {
            return None;
        }
        let parameters = self.parse_function_parameters()?;

        if !self.expect_peek(TokenKind::Lbrace) {
            return None;
        }
        let body = self.parse_block();

        Some(Expr {
            kind: ExprKind::FunctionLiteral {
                name: String::new(),
                parameters,
                body,
            },
            token,
        })
    }

    fn parse_function_parameters(&mut self) -> Option<Vec<String>> {
        let mut parameters = Vec::new();

        if self.peek_token.kind == TokenKind::Rparen {
            self.next_token();
            return Some(parameters);
        }

        self.next_token();
        parameters.push(self.cur_token.literal.clone());

        while self.peek_token.kind == TokenKind::Comma {
            self.next_token();
            self.next_token();
            parameters.push(self.cur_token.literal.clone());
        }

        if !self.expect_peek(TokenKind::Rparen) {
            return None;
        }
        Some(parameters)
    }

    fn parse_block(&mut self) -> Block {
        let token = self.cur_token.clone();
        let mut statements = Vec::new();

        self.next_token();
        while self.cur_token.kind != TokenKind::Rbrace && self.cur_token.kind != TokenKind::Eof {
            match self.parse_statement() {
                Some(stmt) => statements.push(stmt),
                None => self.synchronize(),
            }
            self.next_token();
        }

        Block { statements, token }
    }

    fn parse_array_literal(&mut self) -> Option<Expr> {
        let token = self.cur_token.clone();
        let elements = self.parse_expression_list(TokenKind::Rbracket)?;

        Some(Expr {
            kind: ExprKind::ArrayLiteral(elements),
            token,
        })
    }

    fn parse_hash_literal(&mut self) -> Option<Expr> {
        let token = self.cur_token.clone();
        let mut pairs = Vec::new();

        while self.peek_token.kind != TokenKind::Rbrace {
            self.next_token();
            let key = self.parse_expression(Precedence::Lowest)?;

            if !self.expect_peek(TokenKind::Colon) {
                return None;
            }
            self.next_token();
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));

            if self.peek_token.kind != TokenKind::Rbrace && !self.expect_peek(TokenKind::Comma) {
                return None;
            }
        }

        if !self.expect_peek(TokenKind::Rbrace) {
            return None;
        }
        Some(Expr {
            kind: ExprKind::HashLiteral(pairs),
            token,
        })
    }

    fn parse_call_expression(&mut self, function: Expr) -> Option<Expr> {
        let token = self.cur_token.clone();
        let arguments = self.parse_expression_list(TokenKind::Rparen)?;

        Some(Expr {
            kind: ExprKind::Call {
                function: Box::new(function),
                arguments,
            },
            token,
        })
    }

    fn parse_index_expression(&mut self, left: Expr) -> Option<Expr> {
        let token = self.cur_token.clone();

        self.next_token();
        let index = self.parse_expression(Precedence::Lowest)?;

        if !self.expect_peek(TokenKind::Rbracket) {
            return None;
        }
        Some(Expr {
            kind: ExprKind::Index {
                left: Box::new(left),
                index: Box::new(index),
            },
            token,
        })
    }

    fn parse_expression_list(&mut self, end: TokenKind) -> Option<Vec<Expr>> {
        let mut list = Vec::new();

        if self.peek_token.kind == end {
            self.next_token();
            return Some(list);
        }

        self.next_token();
        list.push(self.parse_expression(Precedence::Lowest)?);

        while self.peek_token.kind == TokenKind::Comma {
            self.next_token();
            self.next_token();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }

        if !self.expect_peek(end) {
            return None;
        }
        Some(list)
    }

    // ----------------- HELPERS -----------------

    fn next_token(&mut self) {
        let next = self.lexer.next_token();
        self.cur_token = std::mem::replace(&mut self.peek_token, next);
    }

    fn expect_peek(&mut self, kind: TokenKind) -> bool {
        if self.peek_token.kind == kind {
            self.next_token();
            true
        } else {
            self.errors.push(format!(
                "expected next token to be {}, got {} instead",
                token_kind_display(kind),
                token_kind_display(self.peek_token.kind)
            ));
            false
        }
    }

    /// Skip ahead to the next statement boundary after a parse error.
    fn synchronize(&mut self) {
        while self.cur_token.kind != TokenKind::Semicolon
            && self.cur_token.kind != TokenKind::Eof
        {
            self.next_token();
        }
    }
}

fn token_kind_display(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::Illegal => "ILLEGAL",
        TokenKind::Eof => "EOF",
        TokenKind::Ident => "IDENT",
        TokenKind::Int => "INT",
        TokenKind::Str => "STRING",
        TokenKind::Assign => "=",
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Bang => "!",
        TokenKind::Asterisk => "*",
        TokenKind::Slash => "/",
        TokenKind::Lt => "<",
        TokenKind::Gt => ">",
        TokenKind::Eq => "==",
        TokenKind::NotEq => "!=",
        TokenKind::Comma => ",",
        TokenKind::Semicolon => ";",
        TokenKind::Colon => ":",
        TokenKind::Lparen => "(",
        TokenKind::Rparen => ")",
        TokenKind::Lbrace => "{",
        TokenKind::Rbrace => "}",
        TokenKind::Lbracket => "[",
        TokenKind::Rbracket => "]",
        TokenKind::Function => "FUNCTION",
        TokenKind::Let => "LET",
        TokenKind::True => "TRUE",
        TokenKind::False => "FALSE",
        TokenKind::If => "IF",
        TokenKind::Else => "ELSE",
        TokenKind::Return => "RETURN",
    }
}
