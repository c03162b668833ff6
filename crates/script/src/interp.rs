//! Tree-walking interpreter.
//!
//! Every statement, loop iteration, comprehension step and call goes through
//! [`Interpreter::tick`], which enforces the step budget and the wall-clock
//! deadline. Exceeding either raises an exception the snippet cannot catch.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::ast::*;
use crate::error::{ExcKind, Exception, Result};
use crate::format::format_value;
use crate::host::{CallArgs, Host, HostFn};
use crate::parser::Program;
use crate::value::{
    Builtin, Dict, Function, Method, Num, Range, Type, Value, norm_index, slice_indices,
};

pub(crate) type ScopeRef = Rc<RefCell<Scope>>;

const TRUNCATION_MARKER: &str = "... (truncated)\n";

#[derive(Default)]
pub(crate) struct Scope {
    pub(crate) vars: HashMap<Rc<str>, Value>,
    parent: Option<ScopeRef>,
}

impl Scope {
    fn root() -> ScopeRef {
        Rc::new(RefCell::new(Scope::default()))
    }

    fn child(parent: &ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
        let mut current = Rc::clone(scope);
        loop {
            let next = {
                let s = current.borrow();
                if let Some(value) = s.vars.get(name) {
                    return Some(value.clone());
                }
                s.parent.clone()?
            };
            current = next;
        }
    }
}

/// Resource limits for one run.
#[derive(Debug, Clone)]
pub struct Limits {
    pub timeout: Option<Duration>,
    pub max_steps: Option<u64>,
    pub max_depth: usize,
    pub max_collection_len: usize,
    pub max_str_len: usize,
    pub max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            max_steps: None,
            max_depth: 100,
            max_collection_len: 1_000_000,
            max_str_len: 10_000_000,
            max_output_bytes: 1 << 20,
        }
    }
}

/// Captured `print` output.
#[derive(Debug, Default)]
struct Output {
    buf: String,
    limit: usize,
    truncated: bool,
}

impl Output {
    fn write(&mut self, s: &str) {
        if self.truncated {
            return;
        }
        let room = self.limit.saturating_sub(self.buf.len());
        if s.len() <= room {
            self.buf.push_str(s);
            return;
        }
        let mut cut = room;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf.push_str(&s[..cut]);
        if !self.buf.is_empty() && !self.buf.ends_with('\n') {
            self.buf.push('\n');
        }
        self.buf.push_str(TRUNCATION_MARKER);
        self.truncated = true;
    }
}

pub(crate) enum Flow {
    Next,
    Break,
    Continue,
    Return(Value),
}

/// Lazy iteration over a value. Ranges are never materialized.
pub(crate) enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { next: i64, stop: i64, step: i64 },
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Items(items) => items.next(),
            ValueIter::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let value = *next;
                *next = next.checked_add(*step).unwrap_or(*stop);
                Some(Value::Int(value))
            }
        }
    }
}

pub struct Interpreter<'h> {
    pub(crate) host: &'h mut dyn Host,
    pub(crate) limits: Limits,
    deadline: Option<Instant>,
    builtins: ScopeRef,
    globals: ScopeRef,
    scope: ScopeRef,
    output: Output,
    steps: u64,
    depth: usize,
    handling: Vec<Value>,
    captured: Vec<Weak<RefCell<Scope>>>,
}

impl<'h> Interpreter<'h> {
    /// A fresh interpreter with the pure builtins bound. The deadline starts
    /// counting now.
    pub fn new(host: &'h mut dyn Host, limits: Limits) -> Self {
        let builtins = Scope::root();
        {
            let mut b = builtins.borrow_mut();
            for f in Builtin::ALL {
                b.vars.insert(Rc::from(f.name()), Value::Builtin(f));
            }
            for t in Type::BOUND {
                b.vars.insert(Rc::from(t.name()), Value::Type(t));
            }
            for kind in ExcKind::BUILTIN {
                b.vars.insert(Rc::from(kind.name()), Value::Class(kind));
            }
        }
        let globals = Scope::child(&builtins);
        Self {
            host,
            deadline: limits.timeout.map(|t| Instant::now() + t),
            output: Output {
                limit: limits.max_output_bytes,
                ..Output::default()
            },
            limits,
            builtins,
            scope: Rc::clone(&globals),
            globals,
            steps: 0,
            depth: 0,
            handling: Vec::new(),
            captured: Vec::new(),
        }
    }

    /// Expose a host function under `name`.
    pub fn bind_host(&mut self, name: &str, func: HostFn) {
        self.bind(name, Value::Host(func));
    }

    /// Bind a value in the builtin namespace.
    pub fn bind(&mut self, name: &str, value: Value) {
        self.builtins.borrow_mut().vars.insert(Rc::from(name), value);
    }

    /// Remove a builtin so that using it raises `NameError`.
    pub fn unbind(&mut self, name: &str) -> Option<Value> {
        self.builtins.borrow_mut().vars.remove(name)
    }

    /// Run a whole program in the global namespace.
    pub fn run(&mut self, program: &Program) -> Result<()> {
        self.scope = Rc::clone(&self.globals);
        self.exec_block(&program.body)?;
        Ok(())
    }

    /// A top-level binding, such as `result`.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().vars.get(name).cloned()
    }

    /// Seed a top-level binding before [`Interpreter::run`].
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().vars.insert(Rc::from(name), value);
    }

    pub fn stdout(&self) -> &str {
        &self.output.buf
    }

    pub fn stdout_truncated(&self) -> bool {
        self.output.truncated
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Charge one step and check the deadline.
    pub(crate) fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if let Some(max) = self.limits.max_steps {
            if self.steps > max {
                return Err(Exception::new(
                    ExcKind::ExecutionTimeoutError,
                    format!("step budget of {max} exceeded"),
                ));
            }
        }
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.limits.timeout) {
            if Instant::now() >= deadline {
                return Err(Exception::new(
                    ExcKind::ExecutionTimeoutError,
                    format!("execution exceeded the time limit of {timeout:?}"),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn write(&mut self, s: &str) {
        self.output.write(s);
    }

    pub(crate) fn check_len(&self, len: usize) -> Result<()> {
        if len > self.limits.max_collection_len {
            return Err(Exception::new(
                ExcKind::MemoryError,
                format!(
                    "collection exceeds the limit of {} items",
                    self.limits.max_collection_len
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn check_str(&self, len: usize) -> Result<()> {
        if len > self.limits.max_str_len {
            return Err(Exception::new(
                ExcKind::MemoryError,
                format!(
                    "string exceeds the limit of {} bytes",
                    self.limits.max_str_len
                ),
            ));
        }
        Ok(())
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow> {
        for stmt in body {
            match self.exec(stmt).map_err(|e| e.at(stmt.line))? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test)?.truthy() {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                };
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    if !self.eval(test)?.truthy() {
                        return self.exec_block(orelse);
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Next | Flow::Continue => {}
                    }
                    self.tick()?;
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let items = self.iter(&iterable)?;
                for item in items {
                    self.tick()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Next),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Next | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::Def(def) => {
                let func = self.make_function(def)?;
                self.set(&def.name, func);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Raise(exc) => return Err(self.raise(exc.as_ref())?),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy() {
                    let message = match msg {
                        Some(m) => self.eval(m)?.to_str(),
                        None => String::new(),
                    };
                    return Err(Exception::new(ExcKind::AssertionError, message));
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Import(module) => {
                return Err(Exception::new(
                    ExcKind::ImportError,
                    format!("import of '{module}' is not allowed"),
                ));
            }
        }
        Ok(Flow::Next)
    }

    /// The exception a `raise` statement throws.
    fn raise(&mut self, exc: Option<&Expr>) -> Result<Exception> {
        let Some(expr) = exc else {
            return match self.handling.last() {
                Some(Value::Exception(e)) => Ok((**e).clone()),
                _ => Err(Exception::new(
                    ExcKind::RuntimeError,
                    "no active exception to reraise",
                )),
            };
        };
        match self.eval(expr)? {
            Value::Exception(e) => Ok((*e).clone()),
            Value::Class(kind) => Ok(Exception::new(kind, "")),
            other => Err(Exception::type_error(format!(
                "exceptions must derive from BaseException, not {}",
                other.type_name()
            ))),
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Result<Flow> {
        let outcome = match self.exec_block(body) {
            Ok(Flow::Next) => self.exec_block(orelse),
            Ok(flow) => Ok(flow),
            Err(exc) if exc.kind.is_catchable() => self.handle(exc, handlers),
            Err(exc) => return Err(exc),
        };
        if finalbody.is_empty() {
            return outcome;
        }
        if let Err(exc) = &outcome {
            if !exc.kind.is_catchable() {
                return outcome;
            }
        }
        match self.exec_block(finalbody)? {
            Flow::Next => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, exc: Exception, handlers: &[Handler]) -> Result<Flow> {
        for handler in handlers {
            let matches = match &handler.class {
                None => true,
                Some(class) => {
                    let class = self.eval(class)?;
                    exception_matches(&class, exc.kind)?
                }
            };
            if !matches {
                continue;
            }
            let value = Value::Exception(Rc::new(exc));
            if let Some(name) = &handler.name {
                self.set(name, value.clone());
            }
            self.handling.push(value);
            let flow = self.exec_block(&handler.body);
            self.handling.pop();
            return flow;
        }
        Err(exc)
    }

    // ---- bindings ----

    fn lookup(&self, name: &str) -> Result<Value> {
        Scope::lookup(&self.scope, name).ok_or_else(|| {
            Exception::new(ExcKind::NameError, format!("name '{name}' is not defined"))
        })
    }

    fn set(&mut self, name: &Rc<str>, value: Value) {
        self.scope.borrow_mut().vars.insert(Rc::clone(name), value);
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => {
                self.set(name, value);
                Ok(())
            }
            Target::Subscript(obj, index) => {
                let container = self.eval(obj)?;
                let key = self.eval(index)?;
                self.set_item(&container, key, value)
            }
            Target::Attr(obj, name) => {
                let obj = self.eval(obj)?;
                Err(Exception::new(
                    ExcKind::AttributeError,
                    format!(
                        "'{}' object attribute '{name}' is read-only",
                        obj.type_name()
                    ),
                ))
            }
            Target::Tuple(targets) => self.unpack(targets, value),
            Target::Starred(_) => Err(Exception::new(
                ExcKind::SyntaxError,
                "starred assignment target must be in a list or tuple",
            )),
        }
    }

    fn unpack(&mut self, targets: &[Target], value: Value) -> Result<()> {
        let items = self.collect(&value)?;
        let star = targets.iter().position(|t| matches!(t, Target::Starred(_)));
        match star {
            None => {
                if items.len() != targets.len() {
                    let message = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(Exception::value_error(message));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < star + after {
                    return Err(Exception::value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        star + after,
                        items.len()
                    )));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign(target, item)?;
                }
                if let Target::Starred(inner) = &targets[star] {
                    self.assign(inner, Value::list(middle))?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Result<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = self.inplace(op, current, rhs)?;
                self.set(name, updated);
                Ok(())
            }
            Target::Subscript(obj, index) => {
                let container = self.eval(obj)?;
                let key = self.eval(index)?;
                let current = self.subscript(&container, &key)?;
                let rhs = self.eval(value)?;
                let updated = self.inplace(op, current, rhs)?;
                self.set_item(&container, key, updated)
            }
            _ => Err(Exception::new(
                ExcKind::SyntaxError,
                "illegal expression for augmented assignment",
            )),
        }
    }

    /// `+=` extends lists in place; everything else rebinds.
    fn inplace(&mut self, op: BinOp, current: Value, rhs: Value) -> Result<Value> {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let extra = self.collect(&rhs)?;
            self.check_len(items.borrow().len() + extra.len())?;
            items.borrow_mut().extend(extra);
            return Ok(current);
        }
        self.binary(op, current, rhs)
    }

    pub(crate) fn set_item(&mut self, container: &Value, key: Value, value: Value) -> Result<()> {
        match container {
            Value::List(items) => {
                let len = items.borrow().len();
                let index = key.as_int().ok_or_else(|| {
                    Exception::type_error(format!(
                        "list indices must be integers or slices, not {}",
                        key.type_name()
                    ))
                })?;
                let i = norm_index(index, len).ok_or_else(|| {
                    Exception::new(ExcKind::IndexError, "list assignment index out of range")
                })?;
                items.borrow_mut()[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                let len = dict.borrow().len();
                self.check_len(len + 1)?;
                dict.borrow_mut().insert(key, value)
            }
            other => Err(Exception::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn delete(&mut self, target: &Target) -> Result<()> {
        match target {
            Target::Name(name) => {
                if self.scope.borrow_mut().vars.remove(&**name).is_none() {
                    return Err(Exception::new(
                        ExcKind::NameError,
                        format!("name '{name}' is not defined"),
                    ));
                }
                Ok(())
            }
            Target::Subscript(obj, index) => {
                let container = self.eval(obj)?;
                let key = self.eval(index)?;
                match &container {
                    Value::List(items) => {
                        let len = items.borrow().len();
                        let i = key
                            .as_int()
                            .and_then(|i| norm_index(i, len))
                            .ok_or_else(|| {
                                Exception::new(
                                    ExcKind::IndexError,
                                    "list assignment index out of range",
                                )
                            })?;
                        items.borrow_mut().remove(i);
                        Ok(())
                    }
                    Value::Dict(dict) => {
                        let removed = dict.borrow_mut().remove(&key)?;
                        removed
                            .map(|_| ())
                            .ok_or_else(|| Exception::new(ExcKind::KeyError, key.repr()))
                    }
                    other => Err(Exception::type_error(format!(
                        "'{}' object doesn't support item deletion",
                        other.type_name()
                    ))),
                }
            }
            Target::Tuple(targets) => {
                for t in targets {
                    self.delete(t)?;
                }
                Ok(())
            }
            _ => Err(Exception::new(ExcKind::SyntaxError, "cannot delete expression")),
        }
    }

    fn make_function(&mut self, def: &Rc<FuncDef>) -> Result<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(e) => Some(self.eval(e)?),
                None => None,
            });
        }
        let scope = Rc::downgrade(&self.scope);
        if !self.captured.last().is_some_and(|w| w.ptr_eq(&scope)) {
            self.captured.push(scope);
        }
        Ok(Value::Function(Rc::new(Function {
            def: Rc::clone(def),
            defaults,
            closure: Rc::clone(&self.scope),
        })))
    }

    // ---- expressions ----

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Const(lit) => Ok(lit.to_value()),
            Expr::Name(name) => self.lookup(name),
            Expr::FString(parts) => {
                let text = self.fstring(parts)?;
                Ok(Value::str(text))
            }
            Expr::List(items) => {
                let items = self.eval_items(items)?;
                Ok(Value::list(items))
            }
            Expr::Tuple(items) => {
                let items = self.eval_items(items)?;
                Ok(Value::tuple(items))
            }
            Expr::Dict(items) => self.eval_dict(items),
            Expr::Starred(_) => Err(Exception::new(ExcKind::SyntaxError, "cannot use starred expression here")),
            Expr::Attr(obj, name) => {
                let obj = self.eval(obj)?;
                self.attribute(obj, name)
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj)?;
                if let Expr::Slice(start, stop, step) = &**index {
                    let start = self.slice_bound(start.as_deref())?;
                    let stop = self.slice_bound(stop.as_deref())?;
                    let step = self.slice_bound(step.as_deref())?;
                    return self.slice(&obj, start, stop, step);
                }
                let key = self.eval(index)?;
                self.subscript(&obj, &key)
            }
            Expr::Slice(..) => Err(Exception::new(ExcKind::SyntaxError, "slice outside of a subscript")),
            Expr::Call(func, args) => {
                let func = self.eval(func)?;
                let args = self.eval_args(args)?;
                self.call(&func, args)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                unary(*op, value)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, expr) in rest {
                    let right = self.eval(expr)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda(def) => self.make_function(def),
            Expr::ListComp(elt, generators) => {
                let mut out = Vec::new();
                self.in_comprehension(generators, &mut |this: &mut Self| {
                    let value = this.eval(elt)?;
                    out.push(value);
                    this.check_len(out.len())
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp(key, value, generators) => {
                let mut out = Dict::new();
                self.in_comprehension(generators, &mut |this: &mut Self| {
                    let k = this.eval(key)?;
                    let v = this.eval(value)?;
                    out.insert(k, v)?;
                    this.check_len(out.len())
                })?;
                Ok(Value::dict(out))
            }
        }
    }

    fn eval_items(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        let mut items = Vec::with_capacity(exprs.len());
        for expr in exprs {
            if let Expr::Starred(inner) = expr {
                let value = self.eval(inner)?;
                items.extend(self.collect(&value)?);
            } else {
                items.push(self.eval(expr)?);
            }
        }
        self.check_len(items.len())?;
        Ok(items)
    }

    fn eval_dict(&mut self, items: &[DictItem]) -> Result<Value> {
        let mut dict = Dict::new();
        for item in items {
            match item {
                DictItem::Pair(k, v) => {
                    let k = self.eval(k)?;
                    let v = self.eval(v)?;
                    dict.insert(k, v)?;
                }
                DictItem::Splat(e) => match self.eval(e)? {
                    Value::Dict(other) => {
                        let entries: Vec<_> = other.borrow().iter().cloned().collect();
                        for (k, v) in entries {
                            dict.insert(k, v)?;
                        }
                    }
                    other => {
                        return Err(Exception::type_error(format!(
                            "'{}' object is not a mapping",
                            other.type_name()
                        )));
                    }
                },
            }
        }
        self.check_len(dict.len())?;
        Ok(Value::dict(dict))
    }

    fn eval_args(&mut self, args: &[Arg]) -> Result<CallArgs> {
        let mut call = CallArgs::new();
        for arg in args {
            match arg {
                Arg::Pos(e) => call.positional.push(self.eval(e)?),
                Arg::Star(e) => {
                    let value = self.eval(e)?;
                    call.positional.extend(self.collect(&value)?);
                }
                Arg::Kw(name, e) => {
                    let value = self.eval(e)?;
                    call.keywords.push((name.to_string(), value));
                }
                Arg::StarStar(e) => match self.eval(e)? {
                    Value::Dict(dict) => {
                        for (k, v) in dict.borrow().iter() {
                            let Value::Str(name) = k else {
                                return Err(Exception::type_error("keywords must be strings"));
                            };
                            call.keywords.push((name.to_string(), v.clone()));
                        }
                    }
                    other => {
                        return Err(Exception::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )));
                    }
                },
            }
        }
        Ok(call)
    }

    /// Run `emit` once per combination of comprehension variables, inside a
    /// scope of its own.
    fn in_comprehension(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let scope = Scope::child(&self.scope);
        let saved = std::mem::replace(&mut self.scope, scope);
        let outcome = self.comprehension(generators, emit);
        self.scope = saved;
        outcome
    }

    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&first.iter)?;
        'items: for item in self.iter(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item)?;
            for cond in &first.ifs {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(rest, emit)?;
        }
        Ok(())
    }

    fn fstring(&mut self, parts: &[FPart]) -> Result<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FPart::Lit(s) => out.push_str(s),
                FPart::Expr {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Some('r') => Value::str(value.repr()),
                        Some('s') => Value::str(value.to_str()),
                        _ => value,
                    };
                    let spec = self.fstring(spec)?;
                    out.push_str(&format_value(&value, &spec)?);
                }
            }
            self.check_str(out.len())?;
        }
        Ok(out)
    }

    fn slice_bound(&mut self, expr: Option<&Expr>) -> Result<Option<i64>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                Exception::type_error("slice indices must be integers or None")
            }),
        }
    }

    fn slice(
        &mut self,
        obj: &Value,
        start: Option<i64>,
        stop: Option<i64>,
        step: Option<i64>,
    ) -> Result<Value> {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let picked = slice_indices(items.len(), start, stop, step)?;
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let picked = slice_indices(items.len(), start, stop, step)?;
                Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = slice_indices(chars.len(), start, stop, step)?;
                Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Range(r) => {
                let picked = slice_indices(r.len(), start, stop, step)?;
                self.check_len(picked.len())?;
                Ok(Value::list(
                    picked
                        .into_iter()
                        .filter_map(|i| r.get(i).map(Value::Int))
                        .collect(),
                ))
            }
            other => Err(Exception::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn subscript(&mut self, obj: &Value, key: &Value) -> Result<Value> {
        let index_of = |len: usize, what: &str| -> Result<usize> {
            let i = key.as_int().ok_or_else(|| {
                Exception::type_error(format!(
                    "{what} indices must be integers or slices, not {}",
                    key.type_name()
                ))
            })?;
            norm_index(i, len).ok_or_else(|| {
                Exception::new(ExcKind::IndexError, format!("{what} index out of range"))
            })
        };
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                Ok(items[index_of(items.len(), "list")?].clone())
            }
            Value::Tuple(items) => Ok(items[index_of(items.len(), "tuple")?].clone()),
            Value::Str(s) => {
                let len = s.chars().count();
                let i = index_of(len, "string")?;
                Ok(Value::str(s.chars().nth(i).map(String::from).unwrap_or_default()))
            }
            Value::Range(r) => {
                let i = index_of(r.len(), "range object")?;
                Ok(r.get(i).map(Value::Int).unwrap_or_default())
            }
            Value::Dict(dict) => dict
                .borrow()
                .get(key)?
                .cloned()
                .ok_or_else(|| Exception::new(ExcKind::KeyError, key.repr())),
            other => Err(Exception::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn attribute(&mut self, obj: Value, name: &str) -> Result<Value> {
        if crate::methods::has_method(&obj, name) {
            return Ok(Value::Method(Rc::new(Method {
                receiver: obj,
                name: Rc::from(name),
            })));
        }
        match (&obj, name) {
            (Value::Exception(e), "args") => {
                return Ok(Value::tuple(vec![Value::str(e.message.as_str())]));
            }
            (Value::Type(t), "__name__") => return Ok(Value::str(t.name())),
            (Value::Class(k), "__name__") => return Ok(Value::str(k.name())),
            (Value::Builtin(b), "__name__") => return Ok(Value::str(b.name())),
            (Value::Function(f), "__name__") => return Ok(Value::Str(Rc::clone(&f.def.name))),
            _ => {}
        }
        Err(Exception::new(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{name}'", obj.type_name()),
        ))
    }

    // ---- calls ----

    /// Call any callable value.
    pub(crate) fn call(&mut self, func: &Value, args: CallArgs) -> Result<Value> {
        self.tick()?;
        match func {
            Value::Function(f) => self.call_function(f, args),
            Value::Builtin(b) => self.call_builtin(*b, args),
            Value::Type(t) => self.construct(*t, args),
            Value::Method(m) => self.call_method(&m.receiver, &m.name, args),
            Value::Host(h) => self.host.call(h, args),
            Value::Class(kind) => {
                let values = args.into_positional(kind.name())?;
                let message = match values.as_slice() {
                    [] => String::new(),
                    [one] => one.to_str(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception(Rc::new(Exception::new(*kind, message))))
            }
            other => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, func: &Rc<Function>, args: CallArgs) -> Result<Value> {
        if self.depth >= self.limits.max_depth {
            return Err(Exception::new(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let scope = Scope::child(&func.closure);
        bind_params(func, args, &scope)?;

        let saved = std::mem::replace(&mut self.scope, scope);
        self.depth += 1;
        let outcome = self.exec_block(&func.def.body);
        self.depth -= 1;
        self.scope = saved;

        match outcome? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    // ---- iteration ----

    pub(crate) fn iter(&self, value: &Value) -> Result<ValueIter> {
        let items = match value {
            Value::Range(r) => {
                return Ok(ValueIter::Range {
                    next: r.start,
                    stop: r.stop,
                    step: r.step,
                });
            }
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::Dict(dict) => dict.borrow().keys(),
            other => {
                return Err(Exception::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )));
            }
        };
        Ok(ValueIter::Items(items.into_iter()))
    }

    /// Materialize an iterable, within the collection limit.
    pub(crate) fn collect(&self, value: &Value) -> Result<Vec<Value>> {
        if let Value::Range(r) = value {
            self.check_len(r.len())?;
        }
        Ok(self.iter(value)?.collect())
    }

    // ---- operators ----

    pub(crate) fn binary(&mut self, op: BinOp, left: Value, right: Value) -> Result<Value> {
        if let (Some(a), Some(b)) = (left.as_num(), right.as_num()) {
            return arith(op, a, b);
        }
        match (op, &left, &right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.check_str(a.len() + b.len())?;
                Ok(Value::str(format!("{a}{b}")))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                self.check_len(items.len())?;
                Ok(Value::list(items))
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                let items: Vec<Value> = a.iter().chain(b.iter()).cloned().collect();
                self.check_len(items.len())?;
                Ok(Value::tuple(items))
            }
            (BinOp::Mul, seq, n) | (BinOp::Mul, n, seq)
                if n.as_int().is_some()
                    && matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
            {
                let count = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
                self.repeat(seq, count)
            }
            _ => Err(Exception::type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ))),
        }
    }

    fn repeat(&self, seq: &Value, count: usize) -> Result<Value> {
        match seq {
            Value::Str(s) => {
                self.check_str(s.len().saturating_mul(count))?;
                Ok(Value::str(s.repeat(count)))
            }
            Value::List(items) => {
                let items = items.borrow();
                self.check_len(items.len().saturating_mul(count))?;
                Ok(Value::list(repeated(&items, count)))
            }
            Value::Tuple(items) => {
                self.check_len(items.len().saturating_mul(count))?;
                Ok(Value::tuple(repeated(items, count)))
            }
            other => Err(Exception::type_error(format!(
                "can't multiply sequence of type '{}'",
                other.type_name()
            ))),
        }
    }

    fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
        use std::cmp::Ordering;
        Ok(match op {
            CmpOp::Eq => left.py_eq(right),
            CmpOp::Ne => !left.py_eq(right),
            CmpOp::Is => left.is_same(right),
            CmpOp::IsNot => !left.is_same(right),
            CmpOp::In => contains(right, left)?,
            CmpOp::NotIn => !contains(right, left)?,
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
                let ordering = match (left.as_num(), right.as_num()) {
                    // NaN compares false with everything.
                    (Some(a), Some(b)) => a.cmp(b),
                    _ => Some(left.partial_order(right).ok_or_else(|| {
                        Exception::type_error(format!(
                            "'{}' not supported between instances of '{}' and '{}'",
                            op.symbol(),
                            left.type_name(),
                            right.type_name()
                        ))
                    })?),
                };
                match (op, ordering) {
                    (_, None) => false,
                    (CmpOp::Lt, Some(o)) => o == Ordering::Less,
                    (CmpOp::Le, Some(o)) => o != Ordering::Greater,
                    (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
                    (_, Some(o)) => o != Ordering::Less,
                }
            }
        })
    }
}

impl Drop for Interpreter<'_> {
    /// Functions hold their defining scope and scopes hold functions; clear
    /// every captured scope so those cycles are freed.
    fn drop(&mut self) {
        let mut scopes: Vec<ScopeRef> = self.captured.drain(..).filter_map(|w| w.upgrade()).collect();
        scopes.push(Rc::clone(&self.globals));
        for scope in scopes {
            let vars = std::mem::take(&mut scope.borrow_mut().vars);
            drop(vars);
        }
    }
}

fn bind_params(func: &Function, args: CallArgs, scope: &ScopeRef) -> Result<()> {
    let def = &func.def;
    let name = &def.name;
    let positional_count = def.params.iter().filter(|p| !p.kw_only).count();
    let mut slots: Vec<Option<Value>> = vec![None; def.params.len()];
    let mut extra = Vec::new();

    let given = args.positional.len();
    for (i, value) in args.positional.into_iter().enumerate() {
        if i < positional_count {
            slots[i] = Some(value);
        } else {
            extra.push(value);
        }
    }
    if !extra.is_empty() && def.vararg.is_none() {
        return Err(Exception::type_error(format!(
            "{name}() takes {positional_count} positional arguments but {given} were given"
        )));
    }

    let mut kwargs = Dict::new();
    for (key, value) in args.keywords {
        match def.params.iter().position(|p| *p.name == *key) {
            Some(i) if slots[i].is_some() => {
                return Err(Exception::type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            Some(i) => slots[i] = Some(value),
            None if def.kwarg.is_some() => kwargs.insert(Value::str(key), value)?,
            None => {
                return Err(Exception::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
        }
    }

    let mut scope = scope.borrow_mut();
    for ((param, slot), default) in def.params.iter().zip(slots).zip(&func.defaults) {
        let value = match (slot, default) {
            (Some(v), _) => v,
            (None, Some(d)) => d.clone(),
            (None, None) => {
                return Err(Exception::type_error(format!(
                    "{name}() missing required argument: '{}'",
                    param.name
                )));
            }
        };
        scope.vars.insert(Rc::clone(&param.name), value);
    }
    if let Some(vararg) = &def.vararg {
        scope.vars.insert(Rc::clone(vararg), Value::tuple(extra));
    }
    if let Some(kwarg) = &def.kwarg {
        scope.vars.insert(Rc::clone(kwarg), Value::dict(kwargs));
    }
    Ok(())
}

fn exception_matches(class: &Value, kind: ExcKind) -> Result<bool> {
    match class {
        Value::Class(k) => Ok(k.handles(kind)),
        Value::Tuple(classes) => {
            for c in classes.iter() {
                if exception_matches(c, kind)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(Exception::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

fn repeated(items: &[Value], count: usize) -> Vec<Value> {
    (0..count).flat_map(|_| items.iter().cloned()).collect()
}

pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(Exception::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Dict(dict) => dict.borrow().contains(item),
        Value::Range(r) => Ok(match item {
            Value::Float(f) if f.fract() == 0.0 => r.contains(*f as i64),
            other => other.as_int().is_some_and(|i| r.contains(i)),
        }),
        other => Err(Exception::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value.as_num()) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Some(Num::Int(i))) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Some(Num::Int(i))) => Ok(Value::Int(i)),
        (UnaryOp::Pos, Some(Num::Float(f))) => Ok(Value::Float(f)),
        (op, None) => Err(Exception::type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            value.type_name()
        ))),
    }
}

fn overflow() -> Exception {
    Exception::new(ExcKind::OverflowError, "integer overflow")
}

fn zero_division(message: &str) -> Exception {
    Exception::new(ExcKind::ZeroDivisionError, message)
}

pub(crate) fn arith(op: BinOp, a: Num, b: Num) -> Result<Value> {
    if let (Num::Int(a), Num::Int(b)) = (a, b) {
        return int_arith(op, a, b);
    }
    let (a, b) = (a.as_f64(), b.as_f64());
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(Exception::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            let r = a.powf(b);
            if r.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(Exception::new(
                    ExcKind::OverflowError,
                    "numerical result out of range",
                ));
            }
            r
        }
    };
    Ok(Value::Float(value))
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<Value> {
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return arith(op, Num::Float(a as f64), Num::Float(b as f64));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NoHost;
    use crate::parser::parse;

    fn run_with(src: &str, limits: Limits) -> (Result<()>, Option<Value>, String) {
        let program = parse(src).unwrap();
        let mut host = NoHost;
        let mut interp = Interpreter::new(&mut host, limits);
        let outcome = interp.run(&program);
        let result = interp.global("result");
        (outcome, result, interp.stdout().to_string())
    }

    fn result(src: &str) -> Value {
        let (outcome, result, _) = run_with(src, Limits::default());
        outcome.unwrap();
        result.unwrap_or_default()
    }

    fn error(src: &str) -> Exception {
        run_with(src, Limits::default()).0.unwrap_err()
    }

    #[test]
    fn filters_and_counts() {
        let v = result(
            "
            vessels = [{'length': 45.0}, {'length': 120.0}, {'length': 180.0}]
            big = [v for v in vessels if v['length'] > 100]
            result = {'count': len(big)}
            ",
        );
        assert_eq!(v.repr(), "{'count': 2}");
    }

    #[test]
    fn seeded_globals_are_visible_to_functions() {
        let program = parse("def scaled():\n    return limit * 2\nresult = scaled()").unwrap();
        let mut host = NoHost;
        let mut interp = Interpreter::new(&mut host, Limits::default());
        interp.set_global("limit", Value::Int(21));
        interp.run(&program).unwrap();
        assert_eq!(interp.global("result").and_then(|v| v.as_int()), Some(42));
    }

    #[test]
    fn sequences_repeat_by_cloning() {
        assert_eq!(result("result = [1, 2] * 3").repr(), "[1, 2, 1, 2, 1, 2]");
        assert_eq!(result("result = 2 * (1,)").repr(), "(1, 1)");
        assert_eq!(result("result = [[0]] * 2\nresult[0].append(1)").repr(), "[[0, 1], [0, 1]]");
        assert_eq!(result("result = [1] * -4").repr(), "[]");
        assert_eq!(error("x = [1] * 10 ** 9").kind, ExcKind::MemoryError);
    }

    #[test]
    fn repeating_a_non_sequence_is_a_type_error() {
        let mut host = NoHost;
        let interp = Interpreter::new(&mut host, Limits::default());
        let err = interp.repeat(&Value::Int(3), 2).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);
        assert!(err.message.contains("'int'"), "{}", err.message);
        assert_eq!(error("result = {'a': 1} * 2").kind, ExcKind::TypeError);
    }

    #[test]
    fn huge_format_widths_fail_fast() {
        let limits = Limits {
            timeout: Some(Duration::from_millis(200)),
            ..Limits::default()
        };
        let started = Instant::now();
        let (outcome, _, _) = run_with("result = f'{1:>1000000000}'", limits);
        assert_eq!(outcome.unwrap_err().kind, ExcKind::ValueError);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(error("result = f'{1.5:.70000f}'").kind, ExcKind::ValueError);
        assert_eq!(result("result = '{:>4}'.format(7)").repr(), "'   7'");
    }

    #[test]
    fn arithmetic_follows_python() {
        assert_eq!(result("result = 7 // -2").repr(), "-4");
        assert_eq!(result("result = -7 % 3").repr(), "2");
        assert_eq!(result("result = 1 / 4").repr(), "0.25");
        assert_eq!(result("result = 2 ** 10").repr(), "1024");
        assert_eq!(result("result = 2 ** -1").repr(), "0.5");
        assert_eq!(result("result = 'ab' * 3").repr(), "'ababab'");
        assert_eq!(result("result = [0] * 3").repr(), "[0, 0, 0]");
        assert_eq!(result("result = True + 1").repr(), "2");
    }

    #[test]
    fn overflow_and_zero_division_raise() {
        assert_eq!(error("x = 1 / 0").kind, ExcKind::ZeroDivisionError);
        assert_eq!(error("x = 9223372036854775807 + 1").kind, ExcKind::OverflowError);
    }

    #[test]
    fn chained_comparisons_and_membership() {
        assert_eq!(result("result = 1 < 2 < 3").repr(), "True");
        assert_eq!(result("result = 1 < 3 < 2").repr(), "False");
        assert_eq!(result("result = 'a' in {'a': 1}").repr(), "True");
        assert_eq!(result("result = 3 not in [1, 2]").repr(), "True");
        assert_eq!(result("result = 'ell' in 'hello'").repr(), "True");
        assert_eq!(error("result = 1 < 'a'").kind, ExcKind::TypeError);
    }

    #[test]
    fn functions_closures_and_defaults() {
        let v = result(
            "
            def make_adder(n, scale=1):
                def add(x):
                    return (x + n) * scale
                return add
            add3 = make_adder(3)
            result = [add3(1), make_adder(1, scale=10)(1)]
            ",
        );
        assert_eq!(v.repr(), "[4, 20]");
    }

    #[test]
    fn varargs_and_kwargs() {
        let v = result(
            "
            def f(a, *rest, **opts):
                return [a, rest, opts]
            result = f(1, 2, 3, k='v')
            ",
        );
        assert_eq!(v.repr(), "[1, (2, 3), {'k': 'v'}]");
    }

    #[test]
    fn bad_call_arguments() {
        let e = error("def f(a):\n    return a\nf()");
        assert_eq!(e.kind, ExcKind::TypeError);
        assert!(e.message.contains("missing required argument"));
        let e = error("def f(a):\n    return a\nf(1, 2)");
        assert!(e.message.contains("positional arguments"));
    }

    #[test]
    fn unpacking() {
        assert_eq!(result("a, b = 1, 2\nresult = [b, a]").repr(), "[2, 1]");
        assert_eq!(result("a, *b = [1, 2, 3]\nresult = b").repr(), "[2, 3]");
        assert_eq!(
            result("result = [k for k, v in {'x': 1, 'y': 2}.items() if v > 1]").repr(),
            "['y']"
        );
        assert_eq!(error("a, b = [1, 2, 3]").kind, ExcKind::ValueError);
    }

    #[test]
    fn try_except_else_finally() {
        let v = result(
            "
            log = []
            try:
                {}['missing']
            except KeyError as e:
                log.append('key ' + str(e))
            else:
                log.append('else')
            finally:
                log.append('finally')
            try:
                x = 1
            except Exception:
                pass
            else:
                log.append('no error')
            result = log
            ",
        );
        assert_eq!(v.repr(), "[\"key 'missing'\", 'finally', 'no error']");
    }

    #[test]
    fn except_tuple_and_parent_classes() {
        let v = result(
            "
            caught = []
            for bad in [lambda: [][1], lambda: 1 // 0, lambda: int('x')]:
                try:
                    bad()
                except (LookupError, ArithmeticError) as e:
                    caught.append(type(e).__name__)
                except Exception as e:
                    caught.append('other ' + type(e).__name__)
            result = caught
            ",
        );
        assert_eq!(
            v.repr(),
            "['IndexError', 'ZeroDivisionError', 'other ValueError']"
        );
    }

    #[test]
    fn raise_and_reraise() {
        let e = error("raise ValueError('bad input')");
        assert_eq!(e.kind, ExcKind::ValueError);
        assert_eq!(e.message, "bad input");
        assert_eq!(e.line, Some(1));

        let e = error("try:\n    raise KeyError('k')\nexcept KeyError:\n    raise");
        assert_eq!(e.kind, ExcKind::KeyError);
    }

    #[test]
    fn error_lines_point_at_the_failing_statement() {
        let e = error("x = 1\n\ny = undefined_name");
        assert_eq!(e.kind, ExcKind::NameError);
        assert_eq!(e.line, Some(3));
        assert_eq!(e.to_string(), "NameError: name 'undefined_name' is not defined (line 3)");
    }

    #[test]
    fn import_is_refused() {
        let e = error("import os");
        assert_eq!(e.kind, ExcKind::ImportError);
        assert_eq!(result("try:\n    import os\nexcept ImportError:\n    result = 'no'").repr(), "'no'");
    }

    #[test]
    fn infinite_loop_hits_the_deadline() {
        let limits = Limits {
            timeout: Some(Duration::from_millis(50)),
            ..Limits::default()
        };
        let start = Instant::now();
        let (outcome, _, _) = run_with("while True:\n    pass", limits);
        let e = outcome.unwrap_err();
        assert_eq!(e.kind, ExcKind::ExecutionTimeoutError);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn timeout_cannot_be_caught() {
        let limits = Limits {
            timeout: None,
            max_steps: Some(1_000),
            ..Limits::default()
        };
        let src = "
            while True:
                try:
                    while True:
                        pass
                except Exception:
                    pass
                finally:
                    pass
        ";
        let (outcome, _, _) = run_with(src, limits);
        assert_eq!(outcome.unwrap_err().kind, ExcKind::ExecutionTimeoutError);
    }

    #[test]
    fn recursion_is_limited() {
        let limits = Limits {
            max_depth: 30,
            ..Limits::default()
        };
        let (outcome, _, _) = run_with("def f(n):\n    return f(n + 1)\nf(0)", limits);
        assert_eq!(outcome.unwrap_err().kind, ExcKind::RecursionError);
    }

    #[test]
    fn collections_are_capped() {
        let limits = Limits {
            max_collection_len: 100,
            ..Limits::default()
        };
        let (outcome, _, _) = run_with("x = list(range(1000))", limits.clone());
        assert_eq!(outcome.unwrap_err().kind, ExcKind::MemoryError);
        let (outcome, _, _) = run_with("x = []\nwhile True:\n    x.append(1)", limits);
        assert_eq!(outcome.unwrap_err().kind, ExcKind::MemoryError);
    }

    #[test]
    fn huge_ranges_iterate_lazily() {
        let v = result("n = 0\nfor i in range(10 ** 15):\n    n += 1\n    if n == 5:\n        break\nresult = n");
        assert_eq!(v.repr(), "5");
    }

    #[test]
    fn print_is_captured_and_truncated() {
        let (outcome, _, stdout) = run_with("print('a', 1, None)\nprint('b', end='')", Limits::default());
        outcome.unwrap();
        assert_eq!(stdout, "a 1 None\nb");

        let limits = Limits {
            max_output_bytes: 10,
            ..Limits::default()
        };
        let (outcome, _, stdout) = run_with("for i in range(100):\n    print('line', i)", limits);
        outcome.unwrap();
        assert!(stdout.starts_with("line 0\nlin"));
        assert!(stdout.ends_with("... (truncated)\n"));
    }

    #[test]
    fn fstrings_format_values() {
        let v = result("n = 3.14159\nname = 'x'\nresult = f'{name!r}: {n:.2f} {[1, 2]} {{ok}}'");
        assert_eq!(v.to_str(), "'x': 3.14 [1, 2] {ok}");
    }

    #[test]
    fn unbound_builtin_is_a_name_error() {
        let program = parse("print('hi')").unwrap();
        let mut host = NoHost;
        let mut interp = Interpreter::new(&mut host, Limits::default());
        interp.unbind("print");
        assert_eq!(interp.run(&program).unwrap_err().kind, ExcKind::NameError);
    }

    #[test]
    fn list_plus_equals_extends_in_place() {
        let v = result("a = [1]\nb = a\nb += [2]\nresult = a");
        assert_eq!(v.repr(), "[1, 2]");
    }

    #[test]
    fn del_and_slicing() {
        let v = result("d = {'a': 1, 'b': 2}\ndel d['a']\nxs = [0, 1, 2, 3, 4]\nresult = [d, xs[::2], xs[-2:], 'hello'[1:3]]");
        assert_eq!(v.repr(), "[{'b': 2}, [0, 2, 4], [3, 4], 'el']");
    }

    #[test]
    fn while_else_and_continue() {
        let v = result(
            "
            out = []
            i = 0
            while i < 5:
                i += 1
                if i % 2 == 0:
                    continue
                out.append(i)
            else:
                out.append('done')
            result = out
            ",
        );
        assert_eq!(v.repr(), "[1, 3, 5, 'done']");
    }
}
