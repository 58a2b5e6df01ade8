/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Recursive-descent parser for the embedded expression language.
//!
//! The parser works one logical line at a time. Block structure is not
//! indentation based: a line is classified as a block header (`if x:`), a
//! continuation clause (`else:`), the block terminator `end`, or a list of
//! simple statements, and the compiler assembles blocks from that sequence.

use std::rc::Rc;

use crate::error::{TemplateError, TemplateResult};
use crate::lang::ast::{
    Arg, BinOp, CmpOp, CompFor, Expr, FunctionDef, LogicOp, Param, Stmt, StmtKind, Target,
    UnaryOp,
};
use crate::lang::lexer::{LogicalLine, Tok, Token};
use crate::stack::ensure_sufficient_stack;
use crate::value::Value;

/// Limit on nested brackets and unary operators within one line.
const MAX_NESTING: usize = 200;

/// Header of a statement that opens a block.
#[derive(Debug, Clone)]
pub enum Header {
    If(Expr),
    For(Target, Expr),
    While(Expr),
    Try,
    Def { name: String, params: Vec<Param> },
}

/// Clause that continues an open block.
#[derive(Debug, Clone)]
pub enum Clause {
    Elif(Expr),
    Else,
    Except {
        classes: Vec<String>,
        name: Option<String>,
    },
    Finally,
}

impl Clause {
    pub fn keyword(&self) -> &'static str {
        match self {
            Clause::Elif(_) => "elif",
            Clause::Else => "else",
            Clause::Except { .. } => "except",
            Clause::Finally => "finally",
        }
    }
}

/// Classification of one logical line of code.
///
/// `body` is `Some` when statements follow the colon on the same line.
#[derive(Debug, Clone)]
pub enum Line {
    Simple(Vec<Stmt>),
    Open {
        header: Header,
        body: Option<Vec<Stmt>>,
    },
    Clause {
        clause: Clause,
        body: Option<Vec<Stmt>>,
    },
    End,
}

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const UNSUPPORTED: &[&str] = &[
    "with", "class", "import", "from", "raise", "assert", "yield", "async", "await", "nonlocal",
];

const BLOCK_KEYWORDS: &[&str] = &[
    "if", "for", "while", "try", "def", "elif", "else", "except", "finally",
];

const AUGMENTED: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "**=", "@=", "<<=", ">>=", "&=", "|=", "^=",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Parse one logical line of a code region.
pub fn parse_line(logical: &LogicalLine) -> TemplateResult<Line> {
    let mut parser = Parser::new(&logical.tokens, logical.line);
    if logical.tokens.len() == 1 && logical.tokens[0].is_name("end") {
        return Ok(Line::End);
    }
    let keyword = match parser.peek().map(|t| &t.tok) {
        Some(Tok::Name(word)) => word.clone(),
        _ => String::new(),
    };
    let line = match keyword.as_str() {
        "if" | "elif" | "while" => {
            parser.advance();
            let cond = parser.test()?;
            parser.expect_op(":")?;
            let body = parser.trailing_body()?;
            match keyword.as_str() {
                "if" => Line::Open {
                    header: Header::If(cond),
                    body,
                },
                "while" => Line::Open {
                    header: Header::While(cond),
                    body,
                },
                _ => Line::Clause {
                    clause: Clause::Elif(cond),
                    body,
                },
            }
        }
        "for" => {
            parser.advance();
            let target = parser.target_list()?;
            parser.expect_keyword("in")?;
            let iter = parser.testlist()?;
            parser.expect_op(":")?;
            Line::Open {
                header: Header::For(target, iter),
                body: parser.trailing_body()?,
            }
        }
        "try" | "else" | "finally" => {
            parser.advance();
            parser.expect_op(":")?;
            let body = parser.trailing_body()?;
            match keyword.as_str() {
                "try" => Line::Open {
                    header: Header::Try,
                    body,
                },
                "else" => Line::Clause {
                    clause: Clause::Else,
                    body,
                },
                _ => Line::Clause {
                    clause: Clause::Finally,
                    body,
                },
            }
        }
        "except" => {
            parser.advance();
            let mut classes = Vec::new();
            let mut name = None;
            if !parser.at_op(":") {
                match parser.test()? {
                    Expr::Name(class) => classes.push(class),
                    Expr::Tuple(items) => {
                        for item in items {
                            match item {
                                Expr::Name(class) => classes.push(class),
                                other => {
                                    return Err(TemplateError::syntax(format!(
                                        "expected an exception class name, found {other}"
                                    )));
                                }
                            }
                        }
                    }
                    other => {
                        return Err(TemplateError::syntax(format!(
                            "expected an exception class name, found {other}"
                        )));
                    }
                }
                if parser.eat_keyword("as") {
                    name = Some(parser.expect_name()?);
                }
            }
            parser.expect_op(":")?;
            Line::Clause {
                clause: Clause::Except { classes, name },
                body: parser.trailing_body()?,
            }
        }
        "def" => {
            parser.advance();
            let name = parser.expect_name()?;
            parser.expect_op("(")?;
            let params = parser.params(")")?;
            parser.expect_op(")")?;
            if parser.eat_op("->") {
                parser.test()?;
            }
            parser.expect_op(":")?;
            Line::Open {
                header: Header::Def { name, params },
                body: parser.trailing_body()?,
            }
        }
        word if UNSUPPORTED.contains(&word) => {
            return Err(TemplateError::syntax(format!(
                "'{word}' statements are not supported in templates"
            )));
        }
        _ => Line::Simple(parser.simple_statements()?),
    };
    Ok(line)
}

/// Parse the content of an inline span.
///
/// Returns the statements to execute and, when the content ends with an
/// expression not followed by `;`, the expression to echo.
pub fn parse_inline(tokens: &[Token], line: usize) -> TemplateResult<(Vec<Stmt>, Option<Expr>)> {
    let mut parser = Parser::new(tokens, line);
    let mut stmts = parser.simple_statements()?;
    let silenced = tokens.last().is_some_and(|t| t.is_op(";"));
    let echoes = !silenced && matches!(stmts.last().map(|s| &s.kind), Some(StmtKind::Expr(_)));
    let echo = match stmts.pop() {
        Some(Stmt {
            kind: StmtKind::Expr(expr),
            ..
        }) if echoes => Some(expr),
        Some(stmt) => {
            stmts.push(stmt);
            None
        }
        None => None,
    };
    Ok((stmts, echo))
}

/// Parse a complete expression.
pub fn parse_expression(tokens: &[Token], line: usize) -> TemplateResult<Expr> {
    let mut parser = Parser::new(tokens, line);
    let expr = parser.testlist()?;
    parser.expect_end()?;
    Ok(expr)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    line: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token], line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
            depth: 0,
        }
    }

    /// Run one nested production, counting it against [`MAX_NESTING`].
    fn nested(
        &mut self,
        production: fn(&mut Self) -> TemplateResult<Expr>,
    ) -> TemplateResult<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(TemplateError::syntax("too many nested parentheses"));
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| production(self));
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + n)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn at_op(&self, op: &str) -> bool {
        self.peek().is_some_and(|t| t.is_op(op))
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_name(keyword))
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let found = self.at_op(op);
        if found {
            self.pos += 1;
        }
        found
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.at_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn unexpected(&self) -> TemplateError {
        match self.peek() {
            Some(token) => TemplateError::syntax(format!("invalid syntax near {}", token.describe())),
            None => TemplateError::syntax("unexpected end of statement"),
        }
    }

    fn expect_op(&mut self, op: &str) -> TemplateResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(token) => TemplateError::syntax(format!(
                    "expected '{op}' but found {}",
                    token.describe()
                )),
                None => TemplateError::syntax(format!("expected '{op}' at end of statement")),
            })
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> TemplateResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_name(&mut self) -> TemplateResult<String> {
        match self.peek().map(|t| &t.tok) {
            Some(Tok::Name(name)) if !is_keyword(name) => {
                self.pos += 1;
                Ok(name.clone())
            }
            _ => Err(self.unexpected()),
        }
    }

    fn expect_end(&self) -> TemplateResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    /// Whether the next token can begin an expression.
    fn starts_expr(&self) -> bool {
        match self.peek().map(|t| &t.tok) {
            Some(Tok::Name(name)) => {
                !is_keyword(name) || matches!(name.as_str(), "None" | "True" | "False" | "not" | "lambda")
            }
            Some(Tok::Int(_) | Tok::Float(_) | Tok::Str(_)) => true,
            Some(Tok::Op(op)) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~"),
            None => false,
        }
    }

    fn trailing_body(&mut self) -> TemplateResult<Option<Vec<Stmt>>> {
        if self.at_end() {
            Ok(None)
        } else {
            self.simple_statements().map(Some)
        }
    }

    // Statements

    fn simple_statements(&mut self) -> TemplateResult<Vec<Stmt>> {
        let mut stmts = Vec::new();
        while !self.at_end() {
            stmts.push(self.small_statement()?);
            if !self.eat_op(";") {
                break;
            }
        }
        self.expect_end()?;
        Ok(stmts)
    }

    fn small_statement(&mut self) -> TemplateResult<Stmt> {
        let line = self.peek().map_or(self.line, |t| t.line);
        let word = match self.peek().map(|t| &t.tok) {
            Some(Tok::Name(word)) => word.as_str(),
            _ => "",
        };
        let kind = match word {
            "pass" => {
                self.advance();
                StmtKind::Pass
            }
            "break" => {
                self.advance();
                StmtKind::Break
            }
            "continue" => {
                self.advance();
                StmtKind::Continue
            }
            "return" => {
                self.advance();
                if self.at_end() || self.at_op(";") {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist()?))
                }
            }
            "del" => {
                self.advance();
                let mut targets = vec![to_target(self.bitor()?)?];
                while self.eat_op(",") {
                    targets.push(to_target(self.bitor()?)?);
                }
                StmtKind::Del(targets)
            }
            "global" => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat_op(",") {
                    names.push(self.expect_name()?);
                }
                StmtKind::Global(names)
            }
            "include" if self.include_without_call() => {
                return Err(TemplateError::IncludeSyntax {
                    message: "include must be called like a function, e.g. include('file.inp')"
                        .to_string(),
                    location: None,
                });
            }
            word if BLOCK_KEYWORDS.contains(&word) => {
                return Err(TemplateError::syntax(format!(
                    "'{word}' cannot be used here; block statements must start a line of code"
                )));
            }
            word if UNSUPPORTED.contains(&word) => {
                return Err(TemplateError::syntax(format!(
                    "'{word}' statements are not supported in templates"
                )));
            }
            _ => self.expression_statement()?,
        };
        Ok(Stmt::new(kind, line))
    }

    fn include_without_call(&self) -> bool {
        match self.peek_nth(1) {
            None => false,
            Some(next) => {
                !(next.is_op("(")
                    || next.is_op("=")
                    || next.is_op(";")
                    || next.is_op(".")
                    || next.is_op("[")
                    || AUGMENTED.iter().any(|op| next.is_op(op)))
            }
        }
    }

    fn expression_statement(&mut self) -> TemplateResult<StmtKind> {
        let first = self.testlist()?;
        if self.at_op("=") {
            let mut targets = vec![to_target(first)?];
            loop {
                self.expect_op("=")?;
                let value = self.testlist()?;
                if self.at_op("=") {
                    targets.push(to_target(value)?);
                } else {
                    return Ok(StmtKind::Assign { targets, value });
                }
            }
        }
        if let Some(Tok::Op(op)) = self.peek().map(|t| &t.tok) {
            if let Some(bin) = AUGMENTED.contains(op).then(|| BinOp::from_augmented(op)).flatten() {
                self.advance();
                let target = match to_target(first)? {
                    Target::Unpack(_) => {
                        return Err(TemplateError::syntax(
                            "illegal expression for augmented assignment",
                        ));
                    }
                    target => target,
                };
                let value = self.testlist()?;
                return Ok(StmtKind::AugAssign {
                    target,
                    op: bin,
                    value,
                });
            }
        }
        Ok(StmtKind::Expr(first))
    }

    fn params(&mut self, close: &str) -> TemplateResult<Vec<Param>> {
        let mut params = Vec::new();
        while !self.at_op(close) {
            if self.at_op("*") || self.at_op("**") {
                return Err(TemplateError::syntax(
                    "variadic parameters are not supported in templates",
                ));
            }
            let name = self.expect_name()?;
            let default = if self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p: &Param| p.default.is_some()) {
                return Err(TemplateError::syntax(
                    "non-default argument follows default argument",
                ));
            }
            params.push(Param { name, default });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn target_list(&mut self) -> TemplateResult<Target> {
        let first = self.bitor()?;
        if !self.at_op(",") {
            return to_target(first);
        }
        let mut items = vec![to_target(first)?];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(to_target(self.bitor()?)?);
        }
        Ok(Target::Unpack(items))
    }

    // Expressions

    fn testlist(&mut self) -> TemplateResult<Expr> {
        let first = self.test()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn test(&mut self) -> TemplateResult<Expr> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> TemplateResult<Expr> {
        if self.eat_keyword("lambda") {
            let params = self.params(":")?;
            self.expect_op(":")?;
            let line = self.line;
            let body = self.test()?;
            return Ok(Expr::Lambda(Rc::new(FunctionDef {
                name: "<lambda>".to_string(),
                params,
                body: vec![Stmt::new(StmtKind::Return(Some(body)), line)],
            })));
        }
        let expr = self.or_test()?;
        if self.eat_keyword("if") {
            let cond = self.or_test()?;
            self.expect_keyword("else")?;
            let otherwise = self.test()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(expr),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(expr)
    }

    fn or_test(&mut self) -> TemplateResult<Expr> {
        let mut left = self.and_test()?;
        while self.eat_keyword("or") {
            let right = self.and_test()?;
            left = Expr::Logical(LogicOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> TemplateResult<Expr> {
        let mut left = self.not_test()?;
        while self.eat_keyword("and") {
            let right = self.not_test()?;
            left = Expr::Logical(LogicOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> TemplateResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let token = self.peek()?;
        let op = match &token.tok {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") => CmpOp::NotEq,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::LtE,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::GtE,
            Tok::Name(word) if word == "in" => CmpOp::In,
            Tok::Name(word) if word == "not" && self.peek_nth(1).is_some_and(|t| t.is_name("in")) => {
                self.pos += 1;
                CmpOp::NotIn
            }
            Tok::Name(word) if word == "is" => {
                if self.peek_nth(1).is_some_and(|t| t.is_name("not")) {
                    self.pos += 1;
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn comparison(&mut self) -> TemplateResult<Expr> {
        let first = self.bitor()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.bitor()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> TemplateResult<Expr>,
    ) -> TemplateResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (symbol, op) in ops {
                if self.eat_op(symbol) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bitor(&mut self) -> TemplateResult<Expr> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor)
    }

    fn bitxor(&mut self) -> TemplateResult<Expr> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand)
    }

    fn bitand(&mut self) -> TemplateResult<Expr> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> TemplateResult<Expr> {
        self.binary_level(&[("<<", BinOp::LShift), (">>", BinOp::RShift)], Self::arith)
    }

    fn arith(&mut self) -> TemplateResult<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> TemplateResult<Expr> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
                ("@", BinOp::MatMul),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> TemplateResult<Expr> {
        let op = if self.eat_op("-") {
            UnaryOp::Neg
        } else if self.eat_op("+") {
            UnaryOp::Pos
        } else if self.eat_op("~") {
            UnaryOp::Invert
        } else {
            return self.power();
        };
        let operand = self.nested(Self::factor)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> TemplateResult<Expr> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.nested(Self::factor)?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> TemplateResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let args = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op("[") {
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let name = match self.advance().map(|t| &t.tok) {
                    Some(Tok::Name(name)) => name.clone(),
                    _ => return Err(TemplateError::syntax("expected an attribute name after '.'")),
                };
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> TemplateResult<Vec<Arg>> {
        let mut args = Vec::new();
        while !self.at_op(")") {
            if self.eat_op("**") {
                args.push(Arg::DoubleStar(self.test()?));
            } else if self.eat_op("*") {
                args.push(Arg::Star(self.test()?));
            } else if matches!(self.peek().map(|t| &t.tok), Some(Tok::Name(_)))
                && self.peek_nth(1).is_some_and(|t| t.is_op("="))
            {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                args.push(Arg::Keyword(name, self.test()?));
            } else {
                let value = self.test()?;
                if self.at_keyword("for") {
                    let clauses = self.comp_clauses()?;
                    args.push(Arg::Positional(Expr::ListComp {
                        element: Box::new(value),
                        clauses,
                    }));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn subscript_item(&mut self) -> TemplateResult<Expr> {
        let lower = if self.at_op(":") {
            None
        } else {
            let expr = self.test()?;
            if !self.at_op(":") {
                return Ok(expr);
            }
            Some(Box::new(expr))
        };
        self.expect_op(":")?;
        let bound = |parser: &mut Self| -> TemplateResult<Option<Box<Expr>>> {
            if parser.at_op("]") || parser.at_op(":") || parser.at_op(",") {
                Ok(None)
            } else {
                parser.test().map(|e| Some(Box::new(e)))
            }
        };
        let upper = bound(self)?;
        let step = if self.eat_op(":") { bound(self)? } else { None };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn subscript(&mut self) -> TemplateResult<Expr> {
        let first = self.subscript_item()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            items.push(self.subscript_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn comp_clauses(&mut self) -> TemplateResult<Vec<CompFor>> {
        let mut clauses = Vec::new();
        while self.eat_keyword("for") {
            let target = self.target_list()?;
            self.expect_keyword("in")?;
            let iter = self.or_test()?;
            let mut conds = Vec::new();
            while self.eat_keyword("if") {
                conds.push(self.or_test()?);
            }
            clauses.push(CompFor {
                target,
                iter,
                conds,
            });
        }
        Ok(clauses)
    }

    /// Comma-separated items up to `close`, with an optional trailing comma.
    fn sequence_rest(&mut self, first: Expr, close: &str) -> TemplateResult<Vec<Expr>> {
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(close) {
                break;
            }
            items.push(self.test()?);
        }
        self.expect_op(close)?;
        Ok(items)
    }

    fn atom(&mut self) -> TemplateResult<Expr> {
        let Some(token) = self.advance() else {
            return Err(self.unexpected());
        };
        match &token.tok {
            Tok::Int(i) => Ok(Expr::Literal(Value::Int(*i))),
            Tok::Float(x) => Ok(Expr::Literal(Value::Float(*x))),
            Tok::Str(s) => {
                let mut text = s.clone();
                while let Some(Tok::Str(next)) = self.peek().map(|t| &t.tok) {
                    text.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Literal(Value::Str(text)))
            }
            Tok::Name(name) => match name.as_str() {
                "None" => Ok(Expr::Literal(Value::None)),
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                word if is_keyword(word) => {
                    self.pos -= 1;
                    Err(self.unexpected())
                }
                _ => Ok(Expr::Name(name.clone())),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.test()?;
                if self.at_keyword("for") {
                    let clauses = self.comp_clauses()?;
                    self.expect_op(")")?;
                    return Ok(Expr::ListComp {
                        element: Box::new(first),
                        clauses,
                    });
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                Ok(Expr::Tuple(self.sequence_rest(first, ")")?))
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.test()?;
                if self.at_keyword("for") {
                    let clauses = self.comp_clauses()?;
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp {
                        element: Box::new(first),
                        clauses,
                    });
                }
                Ok(Expr::List(self.sequence_rest(first, "]")?))
            }
            Tok::Op("{") => {
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let key = self.test()?;
                if !self.eat_op(":") {
                    return Err(TemplateError::syntax("set literals are not supported"));
                }
                let value = self.test()?;
                if self.at_keyword("for") {
                    let clauses = self.comp_clauses()?;
                    self.expect_op("}")?;
                    return Ok(Expr::DictComp {
                        key: Box::new(key),
                        value: Box::new(value),
                        clauses,
                    });
                }
                let mut items = vec![(key, value)];
                while self.eat_op(",") {
                    if self.at_op("}") {
                        break;
                    }
                    let key = self.test()?;
                    self.expect_op(":")?;
                    items.push((key, self.test()?));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(items))
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }
}

/// Convert a parsed expression into an assignment target.
pub fn to_target(expr: Expr) -> TemplateResult<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Index(object, index) => Ok(Target::Index {
            object: *object,
            index: *index,
        }),
        Expr::Attribute(object, name) => Ok(Target::Attribute {
            object: *object,
            name,
        }),
        Expr::Tuple(items) | Expr::List(items) => Ok(Target::Unpack(
            items.into_iter().map(to_target).collect::<TemplateResult<_>>()?,
        )),
        other => Err(TemplateError::syntax(format!("cannot assign to {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::lexer::{tokenize, tokenize_lines};

    fn line(source: &str) -> Line {
        let lines = tokenize_lines(source, 1).unwrap();
        parse_line(&lines[0]).unwrap()
    }

    fn expr(source: &str) -> String {
        parse_expression(&tokenize(source, 1).unwrap(), 1)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(expr("1 + 2 * 3 ** -2"), "1 + (2 * (3 ** (-2)))");
        assert_eq!(expr("not a == b and c"), "(not (a == b)) and c");
        assert_eq!(expr("a if b else c"), "a if b else c");
        assert_eq!(expr("x[1:2, ::3]"), "x[(1:2, ::3)]");
    }

    #[test]
    fn test_comprehensions_and_calls() {
        assert_eq!(expr("[i*2 for i in range(3) if i]"), "[i * 2 for i in range(3) if i]");
        assert_eq!(expr("{k: v for k, v in d.items()}"), "{k: v for (k, v) in d.items()}");
        assert_eq!(expr("f(1, *a, k=2, **kw)"), "f(1, *a, k=2, **kw)");
        assert_eq!(expr("sum(x for x in y)"), "sum([x for x in y])");
    }

    #[test]
    fn test_block_lines() {
        assert!(matches!(line("if x > 1:"), Line::Open { header: Header::If(_), body: None }));
        assert!(matches!(line("for i, j in pairs:"), Line::Open { header: Header::For(Target::Unpack(_), _), .. }));
        assert!(matches!(line("elif y: z = 1"), Line::Clause { clause: Clause::Elif(_), body: Some(_) }));
        assert!(matches!(line("except (KeyError, NameError) as e:"), Line::Clause { clause: Clause::Except { .. }, .. }));
        assert!(matches!(line("end"), Line::End));
        assert!(matches!(line("end = 3"), Line::Simple(_)));
    }

    #[test]
    fn test_assignments() {
        let Line::Simple(stmts) = line("a = b = 1; c += 2") else {
            panic!("expected simple statements");
        };
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0].kind, StmtKind::Assign { targets, .. } if targets.len() == 2));
        assert!(matches!(&stmts[1].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
    }

    #[test]
    fn test_include_without_call() {
        let lines = tokenize_lines("include 'file.inp'", 1).unwrap();
        let err = parse_line(&lines[0]).unwrap_err();
        assert_eq!(err.class_name(), "IncludeSyntaxError");
    }

    #[test]
    fn test_unsupported_statements() {
        let lines = tokenize_lines("with open(f) as g:", 1).unwrap();
        assert_eq!(parse_line(&lines[0]).unwrap_err().class_name(), "SyntaxError");
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |depth: usize, open: &str, close: &str| {
            format!("{}1{}", open.repeat(depth), close.repeat(depth))
        };
        assert_eq!(expr(&nested(150, "(", ")")), "1");
        for (open, close) in [("(", ")"), ("[", "]"), ("-", "")] {
            let tokens = tokenize(&nested(3000, open, close), 1).unwrap();
            let err = parse_expression(&tokens, 1).unwrap_err();
            assert_eq!(err.class_name(), "SyntaxError");
            assert!(err.message().contains("too many nested parentheses"));
        }
    }

    #[test]
    fn test_nesting_limit_on_small_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let source = format!("{}x{}", "[(".repeat(1500), ")]".repeat(1500));
                let tokens = tokenize(&source, 1).unwrap();
                parse_expression(&tokens, 1).unwrap_err().class_name()
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), "SyntaxError");
    }

    #[test]
    fn test_inline_echo() {
        let tokens = tokenize("x = 1; x", 1).unwrap();
        let (stmts, echo) = parse_inline(&tokens, 1).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(echo.is_some());
        let tokens = tokenize("f(x);", 1).unwrap();
        let (stmts, echo) = parse_inline(&tokens, 1).unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(echo.is_none());
    }
}
