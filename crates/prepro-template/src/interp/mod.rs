/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tree-walking executor for compiled templates.
//!
//! A [`Machine`] runs one program body against the shared
//! [`Environment`], appending to its own output buffer. Function calls push
//! a local [`Scope`]; comprehensions push a transparent one whose reads fall
//! through to the enclosing scope.

pub mod builtins;
pub mod methods;
pub mod ops;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::env::Environment;
use crate::error::{ErrorKind, TemplateError, TemplateResult};
use crate::format::echo;
use crate::lang::ast::{
    Arg, BinOp, CompFor, Expr, FunctionDef, Handler, LogicOp, Piece, Stmt, StmtKind, Target,
};
use crate::render::Session;
use crate::stack::ensure_sufficient_stack;
use crate::value::{BoundMethod, Dict, Value};

/// Limit on nested user-function calls.
const MAX_CALL_DEPTH: usize = 64;

/// A pending `rebase(name, **kw)` request.
pub(crate) type Rebase = (String, Vec<(String, Value)>);

/// Evaluated call arguments.
#[derive(Debug, Default)]
pub(crate) struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keywords: Vec::new(),
        }
    }

    /// Check the positional argument count.
    pub fn check(&self, name: &str, min: usize, max: usize) -> TemplateResult<()> {
        let given = self.positional.len();
        if given >= min && given <= max {
            return Ok(());
        }
        let (expected, count) = if min == max {
            ("exactly", min)
        } else if given < min {
            ("at least", min)
        } else {
            ("at most", max)
        };
        let plural = if count == 1 { "" } else { "s" };
        Err(TemplateError::type_error(format!(
            "{name}() takes {expected} {count} argument{plural} ({given} given)"
        )))
    }

    /// Remove and return a keyword argument.
    pub fn keyword(&mut self, key: &str) -> Option<Value> {
        let at = self.keywords.iter().position(|(k, _)| k == key)?;
        Some(self.keywords.remove(at).1)
    }

    /// Fail if any keyword argument is left unconsumed.
    pub fn no_keywords(&self, name: &str) -> TemplateResult<()> {
        match self.keywords.first() {
            None => Ok(()),
            Some((key, _)) => Err(TemplateError::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            ))),
        }
    }

    fn unmarked(self) -> Self {
        Self {
            positional: self.positional.into_iter().map(Value::unmarked).collect(),
            keywords: self
                .keywords
                .into_iter()
                .map(|(k, v)| (k, v.unmarked()))
                .collect(),
        }
    }
}

/// How a statement finished.
#[derive(Debug)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Local variables of a function call or comprehension.
#[derive(Debug, Default)]
struct Scope {
    vars: HashMap<String, Value>,
    globals: HashSet<String>,
    /// Reads that miss continue into the enclosing scope.
    transparent: bool,
}

/// Executes one program body.
pub(crate) struct Machine<'m> {
    session: &'m mut Session,
    env: &'m mut Environment,
    out: String,
    file: String,
    dir: Option<PathBuf>,
    scopes: Vec<Scope>,
    calls: usize,
    rebase: Option<Rebase>,
}

impl<'m> Machine<'m> {
    pub fn new(
        session: &'m mut Session,
        env: &'m mut Environment,
        file: &str,
        dir: Option<&Path>,
    ) -> Self {
        Self {
            session,
            env,
            out: String::new(),
            file: file.to_string(),
            dir: dir.map(Path::to_path_buf),
            scopes: Vec::new(),
            calls: 0,
            rebase: None,
        }
    }

    /// Run a program body, returning its output and any rebase request.
    pub fn run(mut self, body: &[Stmt]) -> TemplateResult<(String, Option<Rebase>)> {
        match self.exec_block(body)? {
            Flow::Normal => Ok((self.out, self.rebase)),
            Flow::Return(_) => Err(TemplateError::syntax("'return' outside function")
                .with_location(&self.file, last_line(body))),
            Flow::Break | Flow::Continue => Err(TemplateError::syntax(
                "'break' or 'continue' outside loop",
            )
            .with_location(&self.file, last_line(body))),
        }
    }

    pub(crate) fn env(&self) -> &Environment {
        &*self.env
    }

    pub(crate) fn fmt(&self) -> &str {
        self.session.fmt()
    }

    pub(crate) fn set_fmt(&mut self, fmt: String) {
        self.session.set_fmt(fmt);
    }

    /// Run an include and append its output here.
    pub(crate) fn include(&mut self, name: &str, overrides: Vec<(String, Value)>) -> TemplateResult<()> {
        debug!(include = name, from = %self.file, "including template");
        for (key, value) in overrides {
            self.env.set(key, value);
        }
        let text = self.session.include(name, &mut *self.env, self.dir.as_deref())?;
        self.out.push_str(&text);
        Ok(())
    }

    pub(crate) fn request_rebase(&mut self, name: String, overrides: Vec<(String, Value)>) {
        debug!(base = %name, from = %self.file, "rebase requested");
        self.rebase = Some((name, overrides));
    }

    /// Resolve a name without raising.
    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        for scope in self.scopes.iter().rev() {
            if scope.globals.contains(name) {
                break;
            }
            if let Some(value) = scope.vars.get(name) {
                return Some(value.clone());
            }
            if !scope.transparent {
                break;
            }
        }
        self.env.lookup(name).cloned()
    }

    fn load_name(&self, name: &str) -> TemplateResult<Value> {
        self.lookup(name).ok_or_else(|| TemplateError::name_error(name))
    }

    fn store_name(&mut self, name: &str, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) if !scope.globals.contains(name) => {
                scope.vars.insert(name.to_string(), value.unmarked());
            }
            _ => {
                self.env.set(name, value);
            }
        }
    }

    fn delete_name(&mut self, name: &str) -> TemplateResult<()> {
        if let Some(scope) = self.scopes.last_mut() {
            if !scope.globals.contains(name) {
                return match scope.vars.remove(name) {
                    Some(_) => Ok(()),
                    None => Err(TemplateError::name_error(name)),
                };
            }
        }
        self.env
            .delete(name)
            .map(|_| ())
            .ok_or_else(|| TemplateError::name_error(name))
    }

    // Statements

    fn exec_block(&mut self, body: &[Stmt]) -> TemplateResult<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> TemplateResult<Flow> {
        ensure_sufficient_stack(|| self.exec_kind(&stmt.kind))
            .map_err(|err| err.with_location(&self.file, stmt.line))
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> TemplateResult<Flow> {
        match kind {
            StmtKind::Write(pieces) => {
                for piece in pieces {
                    match piece {
                        Piece::Text(text) => self.out.push_str(text),
                        Piece::Echo { expr, raw } => {
                            let value = self.eval(expr)?;
                            let text = echo(&value, self.session.fmt(), *raw)?;
                            self.out.push_str(&text);
                        }
                        Piece::Exec(stmt) => match self.exec(stmt)? {
                            Flow::Normal => {}
                            other => return Ok(other),
                        },
                    }
                }
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_marked(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Global(names) => {
                if let Some(scope) = self.scopes.iter_mut().rev().find(|s| !s.transparent) {
                    scope.globals.extend(names.iter().cloned());
                }
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                for item in self.eval(iter)?.iterate()? {
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { cond, body, orelse } => {
                while self.eval(cond)?.truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => {
                let outcome = match self.exec_block(body) {
                    Ok(Flow::Normal) => self.exec_block(orelse),
                    Ok(flow) => Ok(flow),
                    Err(err) => match handlers.iter().find(|h| catches(h, &err)) {
                        Some(handler) => {
                            debug!(error = err.class_name(), "exception handled");
                            if let Some(name) = &handler.name {
                                self.store_name(name, Value::Str(err.message()));
                            }
                            self.exec_block(&handler.body)
                        }
                        None => Err(err),
                    },
                };
                if !finally.is_empty() {
                    match self.exec_block(finally)? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                return outcome;
            }
            StmtKind::Def(def) => {
                self.store_name(&def.name, Value::Function(Rc::clone(def)));
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Target, value: Value) -> TemplateResult<()> {
        match target {
            Target::Name(name) => {
                self.store_name(name, value);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                if let Expr::Slice { .. } = index {
                    return Err(TemplateError::type_error("slice assignment is not supported"));
                }
                let index = self.eval(index)?;
                ops::set_item(&object, index, value.unmarked())
            }
            Target::Attribute { object, name } => {
                let object = self.eval(object)?;
                Err(TemplateError::runtime(
                    ErrorKind::AttributeError,
                    format!("'{}' object attribute '{name}' is read-only", object.type_name()),
                ))
            }
            Target::Unpack(targets) => {
                let items = value.unmarked().iterate()?;
                if items.len() != targets.len() {
                    let message = if items.len() < targets.len() {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    } else {
                        format!("too many values to unpack (expected {})", targets.len())
                    };
                    return Err(TemplateError::value_error(message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> TemplateResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.load_name(name)?;
                let rhs = self.eval(value)?;
                let updated = in_place(op, current, rhs)?;
                self.store_name(name, updated);
                Ok(())
            }
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                let current = ops::get_item(&object, &index)?;
                let rhs = self.eval(value)?;
                ops::set_item(&object, index, in_place(op, current, rhs)?)
            }
            Target::Attribute { .. } | Target::Unpack(_) => Err(TemplateError::syntax(
                "illegal expression for augmented assignment",
            )),
        }
    }

    fn delete(&mut self, target: &Target) -> TemplateResult<()> {
        match target {
            Target::Name(name) => self.delete_name(name),
            Target::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                ops::del_item(&object, &index)
            }
            Target::Attribute { name, .. } => Err(TemplateError::runtime(
                ErrorKind::AttributeError,
                format!("cannot delete attribute '{name}'"),
            )),
            Target::Unpack(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
        }
    }

    // Expressions

    /// Evaluate, dropping any `Immutable(..)`/`Mutable(..)` wrapper.
    fn eval(&mut self, expr: &Expr) -> TemplateResult<Value> {
        Ok(self.eval_marked(expr)?.unmarked())
    }

    /// Evaluate, keeping a top-level lock wrapper for the assignment to see.
    fn eval_marked(&mut self, expr: &Expr) -> TemplateResult<Value> {
        ensure_sufficient_stack(|| self.eval_expr(expr))
    }

    fn eval_expr(&mut self, expr: &Expr) -> TemplateResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self.load_name(name),
            Expr::List(items) => Ok(Value::list(self.eval_all(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items)?)),
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::ListComp { element, clauses } => {
                let mut items = Vec::new();
                self.comprehension(clauses, &mut |machine| {
                    items.push(machine.eval(element)?);
                    Ok(())
                })?;
                Ok(Value::list(items))
            }
            Expr::DictComp {
                key,
                value,
                clauses,
            } => {
                let mut dict = Dict::new();
                self.comprehension(clauses, &mut |machine| {
                    let k = machine.eval(key)?;
                    let v = machine.eval(value)?;
                    dict.insert(k, v)
                })?;
                Ok(Value::dict(dict))
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                ops::unary(*op, operand)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, left, right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left)?;
                let short_circuit = match op {
                    LogicOp::And => !left.truthy(),
                    LogicOp::Or => left.truthy(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval_marked(then)
                } else {
                    self.eval_marked(otherwise)
                }
            }
            Expr::Lambda(def) => Ok(Value::Function(Rc::clone(def))),
            Expr::Call { func, args } => {
                if let Expr::Attribute(object, name) = func.as_ref() {
                    let receiver = self.eval(object)?;
                    if methods::has_method(&receiver, name) {
                        let args = self.eval_args(args)?.unmarked();
                        return methods::call_method(self, &receiver, name, args);
                    }
                    return Err(no_attribute(&receiver, name));
                }
                let callee = self.eval(func)?;
                let args = self.eval_args(args)?;
                self.call_value(&callee, args)
            }
            Expr::Attribute(object, name) => {
                let receiver = self.eval(object)?;
                if methods::has_method(&receiver, name) {
                    Ok(Value::Method(Rc::new(BoundMethod {
                        receiver,
                        name: name.clone(),
                    })))
                } else {
                    Err(no_attribute(&receiver, name))
                }
            }
            Expr::Index(object, index) => {
                let object = self.eval(object)?;
                match index.as_ref() {
                    Expr::Slice { lower, upper, step } => {
                        let lower = self.slice_bound(lower.as_deref())?;
                        let upper = self.slice_bound(upper.as_deref())?;
                        let step = self.slice_bound(step.as_deref())?;
                        ops::slice(&object, lower, upper, step)
                    }
                    index => {
                        let index = self.eval(index)?;
                        ops::get_item(&object, &index)
                    }
                }
            }
            Expr::Slice { .. } => Err(TemplateError::syntax("slice outside of subscript")),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> TemplateResult<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> TemplateResult<Option<i64>> {
        let Some(expr) = bound else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            value => value.as_int().map(Some).ok_or_else(|| {
                TemplateError::type_error(
                    "slice indices must be integers or None or have an __index__ method",
                )
            }),
        }
    }

    fn comprehension(
        &mut self,
        clauses: &[CompFor],
        emit: &mut dyn FnMut(&mut Self) -> TemplateResult<()>,
    ) -> TemplateResult<()> {
        self.scopes.push(Scope {
            transparent: true,
            ..Scope::default()
        });
        let result = self.comp_loop(clauses, emit);
        self.scopes.pop();
        result
    }

    fn comp_loop(
        &mut self,
        clauses: &[CompFor],
        emit: &mut dyn FnMut(&mut Self) -> TemplateResult<()>,
    ) -> TemplateResult<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            return emit(self);
        };
        'items: for item in self.eval(&clause.iter)?.iterate()? {
            self.assign(&clause.target, item)?;
            for cond in &clause.conds {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            self.comp_loop(rest, emit)?;
        }
        Ok(())
    }

    fn eval_args(&mut self, args: &[Arg]) -> TemplateResult<Args> {
        let mut evaluated = Args::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => evaluated.positional.push(self.eval_marked(expr)?),
                Arg::Star(expr) => evaluated.positional.extend(self.eval(expr)?.iterate()?),
                Arg::Keyword(key, expr) => {
                    let value = self.eval_marked(expr)?;
                    push_keyword(&mut evaluated, key.clone(), value)?;
                }
                Arg::DoubleStar(expr) => match self.eval(expr)? {
                    Value::Dict(dict) => {
                        for (key, value) in dict.borrow().iter() {
                            let Value::Str(key) = key else {
                                return Err(TemplateError::type_error("keywords must be strings"));
                            };
                            push_keyword(&mut evaluated, key.clone(), value.clone())?;
                        }
                    }
                    other => {
                        return Err(TemplateError::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )));
                    }
                },
            }
        }
        Ok(evaluated)
    }

    /// Call any callable value.
    pub(crate) fn call_value(&mut self, callee: &Value, args: Args) -> TemplateResult<Value> {
        match callee {
            Value::Builtin(builtin) => {
                let args = if builtin.keeps_marks() { args } else { args.unmarked() };
                builtins::call(self, *builtin, args)
            }
            Value::Function(def) => self.call_function(def, args.unmarked()),
            Value::Method(method) => {
                methods::call_method(self, &method.receiver, &method.name, args.unmarked())
            }
            Value::Marked(_, inner) => self.call_value(inner, args),
            other => Err(TemplateError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, def: &Rc<FunctionDef>, args: Args) -> TemplateResult<Value> {
        if self.calls >= MAX_CALL_DEPTH {
            return Err(TemplateError::runtime(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let name = &def.name;
        let Args {
            positional,
            keywords,
        } = args;
        if positional.len() > def.params.len() {
            return Err(TemplateError::type_error(format!(
                "{name}() takes {} positional arguments but {} were given",
                def.params.len(),
                positional.len()
            )));
        }
        let mut vars = HashMap::new();
        for (param, value) in def.params.iter().zip(positional) {
            vars.insert(param.name.clone(), value);
        }
        for (key, value) in keywords {
            if !def.params.iter().any(|p| p.name == key) {
                return Err(TemplateError::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
            if vars.contains_key(&key) {
                return Err(TemplateError::type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            vars.insert(key, value);
        }
        for param in &def.params {
            if vars.contains_key(&param.name) {
                continue;
            }
            match &param.default {
                Some(default) => {
                    let value = self.eval(default)?;
                    vars.insert(param.name.clone(), value);
                }
                None => {
                    return Err(TemplateError::type_error(format!(
                        "{name}() missing required argument: '{}'",
                        param.name
                    )));
                }
            }
        }
        self.scopes.push(Scope {
            vars,
            globals: HashSet::new(),
            transparent: name == "<lambda>",
        });
        self.calls += 1;
        let result = self.exec_block(&def.body);
        self.calls -= 1;
        self.scopes.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }
}

fn push_keyword(args: &mut Args, key: String, value: Value) -> TemplateResult<()> {
    if args.keywords.iter().any(|(k, _)| *k == key) {
        return Err(TemplateError::syntax(format!("keyword argument repeated: {key}")));
    }
    args.keywords.push((key, value));
    Ok(())
}

fn no_attribute(receiver: &Value, name: &str) -> TemplateError {
    TemplateError::runtime(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{name}'", receiver.type_name()),
    )
}

/// `+=` on a list extends it in place, like Python; other operators rebind.
fn in_place(op: BinOp, current: Value, rhs: Value) -> TemplateResult<Value> {
    if let (BinOp::Add, Value::List(items)) = (op, &current) {
        let extra = rhs.iterate()?;
        items.borrow_mut().extend(extra);
        return Ok(current);
    }
    ops::binary(op, current, rhs)
}

/// Whether an `except` clause catches `err`.
fn catches(handler: &Handler, err: &TemplateError) -> bool {
    if matches!(err, TemplateError::Configuration { .. }) {
        return false;
    }
    if handler.classes.is_empty() {
        return true;
    }
    handler.classes.iter().any(|class| match err.kind() {
        Some(kind) => kind.matches(class),
        None => class == err.class_name() || class == "Exception",
    })
}

fn last_line(body: &[Stmt]) -> usize {
    body.last().map_or(1, |stmt| stmt.line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RenderOptions, render_str};
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> String {
        let options = RenderOptions::new().with_search_dirs(Vec::new());
        render_str(source, &Environment::new(), &options).unwrap().0
    }

    fn fail(source: &str) -> TemplateError {
        let options = RenderOptions::new().with_search_dirs(Vec::new());
        render_str(source, &Environment::new(), &options).unwrap_err()
    }

    #[test]
    fn test_loops_and_conditions() {
        let source = "% for i in range(3):\n% if i == 1:\n% continue\n% end\n{i}\n% end\n";
        assert_eq!(run(source), "0\n2\n");
        let source = "% n = 0\n% while True:\n% n += 1\n% if n > 2:\n% break\n% end\n% end\n{n}\n";
        assert_eq!(run(source), "3\n");
    }

    #[test]
    fn test_for_else() {
        let source = "% for x in []:\n% pass\n% else:\nempty\n% end\n";
        assert_eq!(run(source), "empty\n");
    }

    #[test]
    fn test_functions_and_scopes() {
        let source = "{%\ndef f(a, b=2):\n    c = a * b\n    return c\nend\n%}\n{f(3)} {f(3, b=4)} {defined('c')}\n";
        assert_eq!(run(source), "6 12 False\n");
    }

    #[test]
    fn test_global_statement() {
        let source = "% total = 0\n% def add(n):\n% global total\n% total += n\n% end\n% add(2)\n% add(3)\n{total}\n";
        assert_eq!(run(source), "5\n");
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(run("{[x * x for x in range(4) if x % 2]}"), "[1, 9]");
        assert_eq!(run("{ {k: v for k, v in zip('ab', [1, 2])}['b'] }"), "2");
        assert_eq!(run("{sorted([3, 1, 2], key=lambda v: -v)}"), "[3, 2, 1]");
    }

    #[test]
    fn test_try_except() {
        let source = "% try:\n% x = undefined_name\n% except NameError as err:\n{err}\n% finally:\ndone\n% end\n";
        assert_eq!(run(source), "name 'undefined_name' is not defined\ndone\n");
        let source = "% try:\n% x = 1 / 0\n% except KeyError:\nno\n% end\n";
        assert_eq!(fail(source).class_name(), "ZeroDivisionError");
    }

    #[test]
    fn test_unpacking() {
        assert_eq!(run("% a, b = 1, 2\n{b} {a}\n"), "2 1\n");
        assert_eq!(fail("% a, b = [1]\n").class_name(), "ValueError");
    }

    #[test]
    fn test_list_plus_equals_is_in_place() {
        assert_eq!(run("% a = [1]\n% b = a\n% b += [2]\n{a}\n"), "[1, 2]\n");
    }

    #[test]
    fn test_runtime_error_location() {
        let err = fail("line one\n% x = 1\n{missing}\n");
        assert_eq!(err.class_name(), "NameError");
        assert_eq!(err.location().map(|loc| loc.line), Some(3));
    }

    #[test]
    fn test_recursion_limit() {
        let source = "% def f(n):\n% return f(n + 1)\n% end\n{f(0)}\n";
        assert_eq!(fail(source).class_name(), "RecursionError");
    }

    #[test]
    fn test_integer_overflow() {
        for source in [
            "{2**64}",
            "{10**400}",
            "{-(-9223372036854775807 - 1)}",
            "{abs(-9223372036854775807 - 1)}",
            "{sum([9223372036854775807, 1])}",
            "{1 << 64}",
        ] {
            assert_eq!(fail(source).class_name(), "OverflowError", "{source}");
        }
        assert_eq!(run("{2**62 == 4611686018427387904}"), "True");
        let source = "% try:\n% x = 2**64\n% except OverflowError:\n% x = -1\n% end\n{x}\n";
        assert_eq!(run(source), "-1\n");
    }

    #[test]
    fn test_recursion_limit_on_small_stack() {
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let total = run(concat!(
                    "% def total(n):\n% if n == 0:\n% return 0\n% end\n",
                    "% return n + total(n - 1)\n% end\n{total(60)}\n"
                ));
                let runaway = fail("% def f(n):\n% return [f(n + 1)]\n% end\n{f(0)}\n");
                (total, runaway.class_name().to_string())
            })
            .unwrap();
        let (total, class) = handle.join().unwrap();
        assert_eq!(total, "1830\n");
        assert_eq!(class, "RecursionError");
    }

    #[test]
    fn test_methods() {
        assert_eq!(run("{'a,b'.split(',')}"), "['a', 'b']");
        assert_eq!(run("% xs = []\n% xs.append(2)\n{xs}\n"), "[2]\n");
        assert_eq!(run("{'{:.2f}'.format(pi)}"), "3.14");
        assert_eq!(fail("{(1).nope}").class_name(), "AttributeError");
    }
}
