use std::fmt;

use crate::token::Token;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    /// The token that introduced the statement, kept for diagnostics.
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let { name: String, value: Expr },
    Return { value: Expr },
    Expr { expr: Expr },
}

/// Brace-delimited statement list, owned by `if` arms and function bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Ident(String),
    IntLiteral(i64),
    BoolLiteral(bool),
    StringLiteral(String),

    ArrayLiteral(Vec<Expr>),
    HashLiteral(Vec<(Expr, Expr)>),

    Prefix {
        op: PrefixOp,
        right: Box<Expr>,
    },

    Infix {
        op: InfixOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    If {
        condition: Box<Expr>,
        consequence: Block,
        alternative: Option<Block>,
    },

    /// `name` is filled in when the literal is the value of a `let` binding,
    /// which is what makes self-recursive functions resolvable.
    FunctionLiteral {
        name: String,
        parameters: Vec<String>,
        body: Block,
    },

    Call {
        function: Box<Expr>,
        arguments: Vec<Expr>,
    },

    Index {
        left: Box<Expr>,
        index: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Bang,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Eq,
    NotEq,
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixOp::Bang => write!(f, "!"),
            PrefixOp::Minus => write!(f, "-"),
        }
    }
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Lt => "<",
            InfixOp::Gt => ">",
            InfixOp::Eq => "==",
            InfixOp::NotEq => "!=",
        };
        write!(f, "{}", op)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StmtKind::Let { name, value } => write!(f, "let {} = {};", name, value),
            StmtKind::Return { value } => write!(f, "return {};", value),
            StmtKind::Expr { expr } => write!(f, "{}", expr),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in &self.statements {
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Ident(name) => write!(f, "{}", name),
            ExprKind::IntLiteral(value) => write!(f, "{}", value),
            ExprKind::BoolLiteral(value) => write!(f, "{}", value),
            ExprKind::StringLiteral(value) => write!(f, "{}", value),
            ExprKind::ArrayLiteral(elements) => {
                write!(f, "[{}]", join_exprs(elements))
            }
            ExprKind::HashLiteral(pairs) => {
                let rendered: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{}:{}", k, v))
                    .collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
            ExprKind::Prefix { op, right } => write!(f, "({}{})", op, right),
            ExprKind::Infix { op, left, right } => write!(f, "({} {} {})", left, op, right),
            ExprKind::If {
                condition,
                consequence,
                alternative,
            } => {
                write!(f, "if{} {}", condition, consequence)?;
                if let Some(alt) = alternative {
                    write!(f, "else {}", alt)?;
                }
                Ok(())
            }
            ExprKind::FunctionLiteral {
                name,
                parameters,
                body,
            } => {
                if name.is_empty() {
                    write!(f, "fn({}) {}", parameters.join(", "), body)
                } else {
                    write!(f, "fn<{}>({}) {}", name, parameters.join(", "), body)
                }
            }
            ExprKind::Call {
                function,
                arguments,
            } => write!(f, "{}({})", function, join_exprs(arguments)),
            ExprKind::Index { left, index } => write!(f, "({}[{}])", left, index),
        }
    }
}

fn join_exprs(exprs: &[Expr]) -> String {
    let rendered: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
    rendered.join(", ")
}
