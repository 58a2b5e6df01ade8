/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Program AST types.
//!
//! A compiled template is a [`Program`]: a tree of [`Stmt`]s where literal
//! output lines are ordinary `Write` statements interleaved with the code
//! the author wrote. Every statement records the template line it came
//! from, used for error locations.
//!
//! `Display` on [`Program`] renders an indented, Python-like listing of the
//! compiled program, which the command-line driver can dump for debugging.

use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Program {
    /// Template name used in error locations.
    pub name: String,
    pub body: Vec<Stmt>,
}

/// A statement with its 1-based template line.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

impl Stmt {
    pub fn new(kind: StmtKind, line: usize) -> Self {
        Self { kind, line }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// One logical output line: literal text and inline spans.
    Write(Vec<Piece>),

    /// Expression evaluated for its side effects.
    Expr(Expr),

    /// `a = b = value`
    Assign { targets: Vec<Target>, value: Expr },

    /// `a += value`
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },

    /// `del a, b[0]`
    Del(Vec<Target>),

    Pass,
    Break,
    Continue,
    Return(Option<Expr>),

    /// `global a, b` inside a function body.
    Global(Vec<String>),

    /// `if`/`elif` branches and an optional `else`.
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },

    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },

    While {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },

    Try {
        body: Vec<Stmt>,
        handlers: Vec<Handler>,
        orelse: Vec<Stmt>,
        finally: Vec<Stmt>,
    },

    /// `def name(params): ...`
    Def(Rc<FunctionDef>),
}

/// A part of an output line.
#[derive(Debug, Clone)]
pub enum Piece {
    /// Literal text, escapes already restored.
    Text(String),
    /// Inline expression whose value is written out. `raw` is set for `{!expr}`.
    Echo { expr: Expr, raw: bool },
    /// Inline statement executed without output, e.g. `{a = 1}`.
    Exec(Box<Stmt>),
}

/// `except [Class [as name]]:` clause.
#[derive(Debug, Clone)]
pub struct Handler {
    /// Exception class names; empty catches everything.
    pub classes: Vec<String>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

/// A user-defined function (`def` or `lambda`).
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Assignment target.
#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    Index { object: Expr, index: Expr },
    Attribute { object: Expr, name: String },
    Unpack(Vec<Target>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// Literal constant (`None`, `True`, numbers, strings).
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// List comprehension (also used for generator expressions).
    ListComp {
        element: Box<Expr>,
        clauses: Vec<CompFor>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        clauses: Vec<CompFor>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `a and b` / `a or b`
    Logical(LogicOp, Box<Expr>, Box<Expr>),
    /// Chained comparison `a < b <= c`.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Lambda(Rc<FunctionDef>),
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },
    Attribute(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
}

/// One `for target in iter [if cond ...]` clause of a comprehension.
#[derive(Debug, Clone)]
pub struct CompFor {
    pub target: Target,
    pub iter: Expr,
    pub conds: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
    Star(Expr),
    DoubleStar(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::MatMul => "@",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
        }
    }

    /// Operator for an augmented assignment token such as `+=`.
    pub fn from_augmented(op: &str) -> Option<Self> {
        let op = op.strip_suffix('=')?;
        [
            BinOp::Add,
            BinOp::Sub,
            BinOp::Mul,
            BinOp::Div,
            BinOp::FloorDiv,
            BinOp::Mod,
            BinOp::Pow,
            BinOp::MatMul,
            BinOp::LShift,
            BinOp::RShift,
            BinOp::BitAnd,
            BinOp::BitOr,
            BinOp::BitXor,
        ]
        .into_iter()
        .find(|candidate| candidate.symbol() == op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        }
    }
}

// Listing output

struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Expr::Unary(..)
            | Expr::Binary(..)
            | Expr::Logical(..)
            | Expr::Compare(..)
            | Expr::IfElse { .. }
            | Expr::Lambda(_) => write!(f, "({})", self.0),
            other => write!(f, "{other}"),
        }
    }
}

fn join<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_clauses(f: &mut fmt::Formatter<'_>, clauses: &[CompFor]) -> fmt::Result {
    for clause in clauses {
        write!(f, " for {} in {}", clause.target, clause.iter)?;
        for cond in &clause.conds {
            write!(f, " if {cond}")?;
        }
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => f.write_str(&value.repr()),
            Expr::Name(name) => f.write_str(name),
            Expr::List(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            Expr::Tuple(items) => {
                f.write_str("(")?;
                join(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Expr::Dict(items) => {
                f.write_str("{")?;
                for (i, (key, value)) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Expr::ListComp { element, clauses } => {
                write!(f, "[{element}")?;
                write_clauses(f, clauses)?;
                f.write_str("]")
            }
            Expr::DictComp {
                key,
                value,
                clauses,
            } => {
                write!(f, "{{{key}: {value}")?;
                write_clauses(f, clauses)?;
                f.write_str("}")
            }
            Expr::Unary(op, operand) => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                    UnaryOp::Invert => "~",
                    UnaryOp::Not => "not ",
                };
                write!(f, "{symbol}{}", Operand(operand))
            }
            Expr::Binary(op, left, right) => {
                write!(f, "{} {} {}", Operand(left), op.symbol(), Operand(right))
            }
            Expr::Logical(op, left, right) => {
                let word = if *op == LogicOp::And { "and" } else { "or" };
                write!(f, "{} {word} {}", Operand(left), Operand(right))
            }
            Expr::Compare(first, rest) => {
                write!(f, "{}", Operand(first))?;
                for (op, operand) in rest {
                    write!(f, " {} {}", op.symbol(), Operand(operand))?;
                }
                Ok(())
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => write!(
                f,
                "{} if {} else {}",
                Operand(then),
                Operand(cond),
                Operand(otherwise)
            ),
            Expr::Lambda(def) => {
                f.write_str("lambda")?;
                if !def.params.is_empty() {
                    f.write_str(" ")?;
                    join(f, &def.params)?;
                }
                match def.body.first().map(|stmt| &stmt.kind) {
                    Some(StmtKind::Return(Some(body))) => write!(f, ": {body}"),
                    _ => f.write_str(": None"),
                }
            }
            Expr::Call { func, args } => {
                write!(f, "{}(", Operand(func))?;
                join(f, args)?;
                f.write_str(")")
            }
            Expr::Attribute(object, name) => write!(f, "{}.{name}", Operand(object)),
            Expr::Index(object, index) => write!(f, "{}[{index}]", Operand(object)),
            Expr::Slice { lower, upper, step } => {
                if let Some(lower) = lower {
                    write!(f, "{lower}")?;
                }
                f.write_str(":")?;
                if let Some(upper) = upper {
                    write!(f, "{upper}")?;
                }
                if let Some(step) = step {
                    write!(f, ":{step}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Positional(expr) => write!(f, "{expr}"),
            Arg::Keyword(name, expr) => write!(f, "{name}={expr}"),
            Arg::Star(expr) => write!(f, "*{expr}"),
            Arg::DoubleStar(expr) => write!(f, "**{expr}"),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.default {
            Some(default) => write!(f, "{}={default}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Name(name) => f.write_str(name),
            Target::Index { object, index } => write!(f, "{}[{index}]", Operand(object)),
            Target::Attribute { object, name } => write!(f, "{}.{name}", Operand(object)),
            Target::Unpack(targets) => {
                f.write_str("(")?;
                join(f, targets)?;
                f.write_str(")")
            }
        }
    }
}

const INDENT: &str = "    ";

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt], depth: usize) -> fmt::Result {
    if body.is_empty() {
        return writeln!(f, "{}pass", INDENT.repeat(depth));
    }
    for stmt in body {
        write_stmt(f, stmt, depth)?;
    }
    Ok(())
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    match &stmt.kind {
        StmtKind::Write(pieces) => {
            for piece in pieces {
                match piece {
                    Piece::Text(text) => writeln!(f, "{pad}_write({})", Value::from(text.as_str()).repr())?,
                    Piece::Echo { expr, raw: false } => writeln!(f, "{pad}_echo({expr})")?,
                    Piece::Echo { expr, raw: true } => writeln!(f, "{pad}_echo_raw({expr})")?,
                    Piece::Exec(inner) => write_stmt(f, inner, depth)?,
                }
            }
            Ok(())
        }
        StmtKind::Expr(expr) => writeln!(f, "{pad}{expr}"),
        StmtKind::Assign { targets, value } => {
            f.write_str(&pad)?;
            for target in targets {
                write!(f, "{target} = ")?;
            }
            writeln!(f, "{value}")
        }
        StmtKind::AugAssign { target, op, value } => {
            writeln!(f, "{pad}{target} {}= {value}", op.symbol())
        }
        StmtKind::Del(targets) => {
            write!(f, "{pad}del ")?;
            join(f, targets)?;
            writeln!(f)
        }
        StmtKind::Pass => writeln!(f, "{pad}pass"),
        StmtKind::Break => writeln!(f, "{pad}break"),
        StmtKind::Continue => writeln!(f, "{pad}continue"),
        StmtKind::Return(None) => writeln!(f, "{pad}return"),
        StmtKind::Return(Some(value)) => writeln!(f, "{pad}return {value}"),
        StmtKind::Global(names) => writeln!(f, "{pad}global {}", names.join(", ")),
        StmtKind::If { branches, orelse } => {
            for (i, (cond, body)) in branches.iter().enumerate() {
                let keyword = if i == 0 { "if" } else { "elif" };
                writeln!(f, "{pad}{keyword} {cond}:")?;
                write_block(f, body, depth + 1)?;
            }
            if !orelse.is_empty() {
                writeln!(f, "{pad}else:")?;
                write_block(f, orelse, depth + 1)?;
            }
            Ok(())
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            writeln!(f, "{pad}for {target} in {iter}:")?;
            write_block(f, body, depth + 1)?;
            if !orelse.is_empty() {
                writeln!(f, "{pad}else:")?;
                write_block(f, orelse, depth + 1)?;
            }
            Ok(())
        }
        StmtKind::While { cond, body, orelse } => {
            writeln!(f, "{pad}while {cond}:")?;
            write_block(f, body, depth + 1)?;
            if !orelse.is_empty() {
                writeln!(f, "{pad}else:")?;
                write_block(f, orelse, depth + 1)?;
            }
            Ok(())
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finally,
        } => {
            writeln!(f, "{pad}try:")?;
            write_block(f, body, depth + 1)?;
            for handler in handlers {
                write!(f, "{pad}except")?;
                match handler.classes.as_slice() {
                    [] => {}
                    [single] => write!(f, " {single}")?,
                    many => write!(f, " ({})", many.join(", "))?,
                }
                if let Some(name) = &handler.name {
                    write!(f, " as {name}")?;
                }
                writeln!(f, ":")?;
                write_block(f, &handler.body, depth + 1)?;
            }
            if !orelse.is_empty() {
                writeln!(f, "{pad}else:")?;
                write_block(f, orelse, depth + 1)?;
            }
            if !finally.is_empty() {
                writeln!(f, "{pad}finally:")?;
                write_block(f, finally, depth + 1)?;
            }
            Ok(())
        }
        StmtKind::Def(def) => {
            write!(f, "{pad}def {}(", def.name)?;
            join(f, &def.params)?;
            writeln!(f, "):")?;
            write_block(f, &def.body, depth + 1)
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {}", self.name)?;
        for stmt in &self.body {
            write_stmt(f, stmt, 0)?;
        }
        Ok(())
    }
}
