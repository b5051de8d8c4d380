// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Tree-walking evaluator for validated scripts.

use crate::sandbox::args::Args;
use crate::sandbox::error::{ScriptError, TraceFrame};
use crate::sandbox::format::{format_value, repr, to_str};
use crate::sandbox::value::{
    lookup, new_scope, DictKey, Function, FunctionBody, Module, Scope, SliceValue, Value,
};
use crate::sandbox::{builtins, dates, numpy, ops, pandas};
use crate::script::ast::{
    BinOp, BoolOp, Comprehension, Constant, Expr, FStringPart, Program, Stmt, StmtKind,
};
use crate::store::ReadOnlyConnection;
use indexmap::IndexMap;
use std::rc::Rc;
use std::sync::Arc;

const MAX_CALL_DEPTH: usize = 64;
const TRUNCATION_MARKER: &str = "\n...[output truncated]\n";

/// Resource ceilings for one script run.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    pub gas_limit: u64,
    pub max_output_bytes: usize,
    /// Largest list, tuple or string (in bytes) a script may build in one step.
    pub max_collection_len: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            gas_limit: 1_000_000,
            max_output_bytes: 64 * 1024,
            max_collection_len: 10_000_000,
        }
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter {
    globals: Scope,
    limits: SandboxLimits,
    gas_used: u64,
    output: String,
    truncated: bool,
    connection: Option<Arc<dyn ReadOnlyConnection>>,
    stack: Vec<TraceFrame>,
    /// Exceptions currently being handled, innermost last; bare `raise` re-raises the top.
    handling: Vec<ScriptError>,
    depth: usize,
}

impl Interpreter {
    pub fn new(limits: SandboxLimits, connection: Option<Arc<dyn ReadOnlyConnection>>) -> Self {
        let mut interpreter = Self {
            globals: new_scope(None),
            limits,
            gas_used: 0,
            output: String::new(),
            truncated: false,
            connection,
            stack: Vec::new(),
            handling: Vec::new(),
            depth: 0,
        };
        interpreter.install_defaults();
        interpreter
    }

    fn install_defaults(&mut self) {
        self.bind("conn", Value::Connection);
        self.bind("pd", Value::Module(Module::Pandas));
        self.bind("np", Value::Module(Module::Numpy));
        self.bind("datetime", Value::Module(Module::DatetimeClass));
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().vars.insert(name.to_string(), value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().vars.get(name).cloned()
    }

    pub fn run(&mut self, program: &Program) -> Result<(), ScriptError> {
        self.stack.push(TraceFrame {
            line: 0,
            scope: "<module>".to_string(),
        });
        let globals = self.globals.clone();
        let outcome = self.exec_block(&program.body, &globals);
        let trace = self.stack.clone();
        self.stack.clear();
        match outcome {
            Ok(Flow::Normal) => Ok(()),
            Ok(Flow::Return(_)) => Err(ScriptError::new("SyntaxError", "'return' outside function")),
            Ok(Flow::Break | Flow::Continue) => {
                Err(ScriptError::new("SyntaxError", "'break' or 'continue' outside loop"))
            }
            Err(err) => Err(err.with_trace(trace)),
        }
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub fn write_output(&mut self, text: &str) {
        if self.truncated {
            return;
        }
        let room = self.limits.max_output_bytes.saturating_sub(self.output.len());
        if text.len() <= room {
            self.output.push_str(text);
            return;
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.output.push_str(&text[..cut]);
        self.output.push_str(TRUNCATION_MARKER);
        self.truncated = true;
    }

    pub fn connection(&self) -> Result<Arc<dyn ReadOnlyConnection>, ScriptError> {
        self.connection
            .clone()
            .ok_or_else(|| ScriptError::new("DatabaseError", "no database connection is available"))
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.consume(1)
    }

    /// Charges `steps` units against the gas budget.
    pub fn consume(&mut self, steps: u64) -> Result<(), ScriptError> {
        self.gas_used = self.gas_used.saturating_add(steps);
        if self.gas_used > self.limits.gas_limit {
            return Err(ScriptError::budget_exhausted(self.limits.gas_limit));
        }
        Ok(())
    }

    /// Admits a collection of `len` elements, charging gas in proportion to its size.
    pub fn reserve(&mut self, len: u64) -> Result<(), ScriptError> {
        let limit = self.limits.max_collection_len as u64;
        if len > limit {
            return Err(ScriptError::memory_error(format!(
                "cannot build a sequence of {len} elements (limit is {limit})"
            )));
        }
        self.consume(len / 16 + 1)
    }

    /// Binary operator with the sequence size checked and charged up front.
    pub fn binary(&mut self, op: BinOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
        if let Some(len) = ops::produced_len(op, left, right) {
            self.reserve(len)?;
        }
        if let (Value::Frame(_), _) | (_, Value::Frame(_)) = (left, right) {
            return pandas::frame_binary(op, left, right, self.limits.max_collection_len);
        }
        ops::binary(op, left, right, self.limits.max_collection_len)
    }

    fn current_line(&self) -> usize {
        self.stack.last().map_or(0, |frame| frame.line)
    }

    fn exec_block(&mut self, body: &[Stmt], scope: &Scope) -> Result<Flow, ScriptError> {
        for stmt in body {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> Result<Flow, ScriptError> {
        if let Some(frame) = self.stack.last_mut() {
            frame.line = stmt.line;
        }
        self.tick()?;
        self.exec_kind(stmt, scope)
            .map_err(|err| err.with_trace(self.stack.clone()))
    }

    fn exec_kind(&mut self, stmt: &Stmt, scope: &Scope) -> Result<Flow, ScriptError> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target, scope)?;
                let operand = self.eval(value, scope)?;
                if let (BinOp::Add, Value::List(items)) = (op, &current) {
                    let extra = self.iterate(&operand)?;
                    self.reserve((items.borrow().len() + extra.len()) as u64)?;
                    items.borrow_mut().extend(extra);
                } else {
                    let updated = self.binary(*op, &current, &operand)?;
                    self.assign(target, updated, scope)?;
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = import_module(&alias.name)?;
                    let bound = match &alias.asname {
                        Some(_) => module,
                        None => import_module(alias.top_level())?,
                    };
                    scope
                        .borrow_mut()
                        .vars
                        .insert(alias.bound_name().to_string(), bound);
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let source = import_module(module)?;
                for alias in names {
                    if alias.name == "*" {
                        return Err(ScriptError::new(
                            "SyntaxError",
                            "wildcard imports are not supported",
                        ));
                    }
                    let value = self.get_attr(&source, &alias.name).map_err(|_| {
                        ScriptError::new(
                            "ImportError",
                            format!("cannot import name '{}' from '{module}'", alias.name),
                        )
                    })?;
                    scope
                        .borrow_mut()
                        .vars
                        .insert(alias.bound_name().to_string(), value);
                }
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, scope)?.truthy()? {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch, scope);
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter, scope)?;
                for item in self.iterate(&iterable)? {
                    self.tick()?;
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::While { test, body } => {
                while self.eval(test, scope)?.truthy()? {
                    self.tick()?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::FunctionDef { name, params, body } => {
                let mut bound = Vec::with_capacity(params.len());
                for param in params {
                    let default = match &param.default {
                        Some(expr) => Some(self.eval(expr, scope)?),
                        None => None,
                    };
                    bound.push((param.name.clone(), default));
                }
                let function = Function {
                    name: name.clone(),
                    params: bound,
                    body: FunctionBody::Block(Rc::new(body.clone())),
                    closure: Some(scope.clone()),
                };
                scope
                    .borrow_mut()
                    .vars
                    .insert(name.clone(), Value::Function(Rc::new(function)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Try {
                body,
                handlers,
                finalbody,
            } => {
                let outcome = match self.exec_block(body, scope) {
                    Err(err) if !err.fatal => {
                        let handler = handlers.iter().find(|handler| {
                            handler.kind.as_deref().map_or(true, |kind| err.matches(kind))
                        });
                        match handler {
                            Some(handler) => {
                                if let Some(name) = &handler.name {
                                    scope.borrow_mut().vars.insert(
                                        name.clone(),
                                        Value::exception(&err.kind, err.message.clone()),
                                    );
                                }
                                self.handling.push(err);
                                let handled = self.exec_block(&handler.body, scope);
                                self.handling.pop();
                                handled
                            }
                            None => Err(err),
                        }
                    }
                    other => other,
                };
                if !finalbody.is_empty() {
                    match self.exec_block(finalbody, scope)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return outcome;
            }
            StmtKind::Raise(value) => {
                let err = match value {
                    None => self.handling.last().cloned().ok_or_else(|| {
                        ScriptError::new("RuntimeError", "No active exception to reraise")
                    })?,
                    Some(expr) => match self.eval(expr, scope)? {
                        Value::Exception(exc) => ScriptError::new(&exc.kind, exc.message.clone()),
                        Value::ExceptionClass(kind) => ScriptError::new(&kind, ""),
                        other => ScriptError::type_error(format!(
                            "exceptions must derive from BaseException, not '{}'",
                            other.type_name()
                        )),
                    },
                };
                return Err(err);
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &Scope) -> Result<(), ScriptError> {
        match target {
            Expr::Name(name) => {
                scope.borrow_mut().vars.insert(name.clone(), value);
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = self.iterate(&value)?;
                if items.len() > targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                if items.len() < targets.len() {
                    return Err(ScriptError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
            }
            Expr::Attribute { value: owner, attr } => {
                let owner = self.eval(owner, scope)?;
                pandas::set_attr(self, &owner, attr, value)?;
            }
            Expr::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container, scope)?;
                let index = self.eval(index, scope)?;
                self.set_item(&container, &index, value)?;
            }
            _ => {
                return Err(ScriptError::new(
                    "SyntaxError",
                    "cannot assign to expression",
                ))
            }
        }
        Ok(())
    }

    pub fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, ScriptError> {
        match expr {
            Expr::Name(name) => self.load_name(name, scope),
            Expr::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(v) => Value::Bool(*v),
                Constant::Int(v) => Value::Int(*v),
                Constant::Float(v) => Value::Float(*v),
                Constant::Str(v) => Value::Str(v.clone()),
            }),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Interpolation {
                            expr,
                            conversion,
                            format_spec,
                        } => {
                            let value = self.eval(expr, scope)?;
                            let value = match conversion {
                                Some('r' | 'a') => Value::Str(repr(&value)),
                                Some(_) => Value::Str(to_str(&value)),
                                None => value,
                            };
                            let spec = format_spec.as_deref().unwrap_or("");
                            out.push_str(&format_value(&value, spec)?);
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Attribute { value, attr } => {
                let owner = self.eval(value, scope)?;
                self.get_attr(&owner, attr)
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                self.tick()?;
                let callee = self.eval(func, scope)?;
                let mut positional = Vec::with_capacity(args.len());
                for arg in args {
                    positional.push(self.eval(arg, scope)?);
                }
                let mut named = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    named.push((keyword.name.clone(), self.eval(&keyword.value, scope)?));
                }
                self.call_value(&callee, Args::new(positional, named))
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value, scope)?;
                let index = self.eval(index, scope)?;
                self.get_item(&container, &index)
            }
            Expr::Slice { lower, upper, step } => {
                let mut bound = |part: &Option<Box<Expr>>| -> Result<Option<i64>, ScriptError> {
                    match part {
                        None => Ok(None),
                        Some(expr) => match self.eval(expr, scope)? {
                            Value::None => Ok(None),
                            value => value.as_i64().map(Some).ok_or_else(|| {
                                ScriptError::type_error(
                                    "slice indices must be integers or None",
                                )
                            }),
                        },
                    }
                };
                let slice = SliceValue {
                    lower: bound(lower)?,
                    upper: bound(upper)?,
                    step: bound(step)?,
                };
                Ok(Value::Slice(Rc::new(slice)))
            }
            Expr::List(items) => {
                let values = self.eval_all(items, scope)?;
                Ok(Value::list(values))
            }
            Expr::Tuple(items) => {
                let values = self.eval_all(items, scope)?;
                Ok(Value::tuple(values))
            }
            Expr::Dict(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = DictKey::from_value(&self.eval(key, scope)?)?;
                    let value = self.eval(value, scope)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                ops::unary(*op, &value)
            }
            Expr::Binary { left, op, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, &left, &right)
            }
            Expr::Bool { op, values } => {
                let mut last = Value::None;
                for expr in values {
                    last = self.eval(expr, scope)?;
                    let truth = last.truthy()?;
                    match op {
                        BoolOp::And if !truth => return Ok(last),
                        BoolOp::Or if truth => return Ok(last),
                        _ => {}
                    }
                }
                Ok(last)
            }
            Expr::Compare {
                left,
                ops: operators,
                comparators,
            } => {
                let mut current = self.eval(left, scope)?;
                let mut outcome = Value::Bool(true);
                for (op, next) in operators.iter().zip(comparators) {
                    let next = self.eval(next, scope)?;
                    outcome = ops::compare(*op, &current, &next)?;
                    if ops::is_vector(&outcome) {
                        return Ok(outcome);
                    }
                    if !outcome.truthy()? {
                        return Ok(outcome);
                    }
                    current = next;
                }
                Ok(outcome)
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test, scope)?.truthy()? {
                    self.eval(body, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
            Expr::Lambda { params, body } => Ok(Value::Function(Rc::new(Function {
                name: "<lambda>".to_string(),
                params: params.iter().map(|name| (name.clone(), None)).collect(),
                body: FunctionBody::Lambda(Rc::new((**body).clone())),
                closure: Some(scope.clone()),
            }))),
            Expr::ListComp { elt, generators } => {
                let inner = new_scope(Some(scope.clone()));
                let mut out = Vec::new();
                self.comprehend(generators, &inner, &mut |interp, scope| {
                    out.push(interp.eval(elt, scope)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let inner = new_scope(Some(scope.clone()));
                let mut out = IndexMap::new();
                self.comprehend(generators, &inner, &mut |interp, scope| {
                    let k = DictKey::from_value(&interp.eval(key, scope)?)?;
                    let v = interp.eval(value, scope)?;
                    out.insert(k, v);
                    Ok(())
                })?;
                Ok(Value::dict(out))
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr], scope: &Scope) -> Result<Vec<Value>, ScriptError> {
        items.iter().map(|item| self.eval(item, scope)).collect()
    }

    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        scope: &Scope,
        emit: &mut dyn FnMut(&mut Self, &Scope) -> Result<(), ScriptError>,
    ) -> Result<(), ScriptError> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self, scope);
        };
        let iterable = self.eval(&first.iter, scope)?;
        'items: for item in self.iterate(&iterable)? {
            self.tick()?;
            self.assign(&first.target, item, scope)?;
            for cond in &first.ifs {
                if !self.eval(cond, scope)?.truthy()? {
                    continue 'items;
                }
            }
            self.comprehend(rest, scope, emit)?;
        }
        Ok(())
    }

    fn load_name(&self, name: &str, scope: &Scope) -> Result<Value, ScriptError> {
        if let Some(value) = lookup(scope, name) {
            return Ok(value);
        }
        if let Some(builtin) = builtins::resolve(name) {
            return Ok(builtin);
        }
        let mut candidates: Vec<String> = Vec::new();
        let mut cursor = Some(scope.clone());
        while let Some(current) = cursor {
            let data = current.borrow();
            candidates.extend(data.vars.keys().cloned());
            cursor = data.parent.clone();
        }
        candidates.extend(builtins::BUILTINS.iter().map(|name| name.to_string()));
        let hint = builtins::suggest(name, &candidates);
        Err(ScriptError::name_error(name, hint.as_deref()))
    }

    /// Invokes any callable value with evaluated arguments.
    pub fn call_value(&mut self, callee: &Value, args: Args) -> Result<Value, ScriptError> {
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Builtin(name) => builtins::call(self, name, args),
            Value::Method(bound) => {
                let (receiver, name) = &**bound;
                self.call_method(receiver, name, args)
            }
            Value::Module(
                module @ (Module::DatetimeClass | Module::DateClass | Module::TimedeltaClass),
            ) => dates::construct(*module, &args),
            Value::ExceptionClass(kind) => {
                let message = match args.positional.first() {
                    Some(value) => to_str(value),
                    None => String::new(),
                };
                Ok(Value::exception(kind, message))
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: &Rc<Function>, args: Args) -> Result<Value, ScriptError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::new(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        let name = &function.name;
        let scope = new_scope(function.closure.clone());
        if args.positional.len() > function.params.len() {
            return Err(ScriptError::type_error(format!(
                "{name}() takes {} positional arguments but {} were given",
                function.params.len(),
                args.positional.len()
            )));
        }
        let mut bound: IndexMap<String, Value> = function
            .params
            .iter()
            .zip(args.positional)
            .map(|((param, _), value)| (param.clone(), value))
            .collect();
        for (key, value) in args.keywords {
            if !function.params.iter().any(|(param, _)| *param == key) {
                return Err(ScriptError::type_error(format!(
                    "{name}() got an unexpected keyword argument '{key}'"
                )));
            }
            if bound.contains_key(&key) {
                return Err(ScriptError::type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            bound.insert(key, value);
        }
        for (param, default) in &function.params {
            if bound.contains_key(param) {
                continue;
            }
            match default {
                Some(value) => {
                    bound.insert(param.clone(), value.clone());
                }
                None => {
                    return Err(ScriptError::type_error(format!(
                        "{name}() missing 1 required positional argument: '{param}'"
                    )))
                }
            }
        }
        scope.borrow_mut().vars = bound;

        self.depth += 1;
        self.stack.push(TraceFrame {
            line: self.current_line(),
            scope: name.clone(),
        });
        let outcome = match &function.body {
            FunctionBody::Block(body) => match self.exec_block(body, &scope) {
                Ok(Flow::Return(value)) => Ok(value),
                Ok(_) => Ok(Value::None),
                Err(err) => Err(err),
            },
            FunctionBody::Lambda(body) => self.eval(body, &scope),
        };
        let outcome = outcome.map_err(|err| err.with_trace(self.stack.clone()));
        self.stack.pop();
        self.depth -= 1;
        outcome
    }

    pub fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Args,
    ) -> Result<Value, ScriptError> {
        match receiver {
            Value::Frame(_)
            | Value::Series(_)
            | Value::GroupBy(_)
            | Value::Accessor(_)
            | Value::Module(Module::Pandas) => pandas::call_method(self, receiver, name, args),
            Value::Module(Module::Numpy) => numpy::call(self, name, args),
            Value::Module(_) | Value::Date(_) | Value::DateTime(_) | Value::Delta(_) => {
                dates::call_method(self, receiver, name, args)
            }
            _ => builtins::call_method(self, receiver, name, args),
        }
    }

    pub fn get_attr(&mut self, value: &Value, attr: &str) -> Result<Value, ScriptError> {
        let found = match value {
            Value::Frame(_)
            | Value::Series(_)
            | Value::GroupBy(_)
            | Value::Accessor(_)
            | Value::Module(Module::Pandas) => pandas::attribute(self, value, attr)?,
            Value::Module(Module::Numpy) => numpy::attribute(attr),
            Value::Module(_) | Value::Date(_) | Value::DateTime(_) | Value::Delta(_) => {
                dates::attribute(value, attr)
            }
            Value::Exception(exc) if attr == "args" => {
                Some(Value::tuple(vec![Value::Str(exc.message.clone())]))
            }
            _ => builtins::attribute(value, attr),
        };
        found.ok_or_else(|| match value {
            Value::Module(module) if value.type_name() == "module" => ScriptError::new(
                "AttributeError",
                format!("module '{}' has no attribute '{attr}'", module.name()),
            ),
            other => ScriptError::attribute_error(&other.type_name(), attr),
        })
    }

    pub fn get_item(&mut self, container: &Value, index: &Value) -> Result<Value, ScriptError> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                sequence_item(&items, index, "list").map(|picked| match picked {
                    Picked::One(value) => value,
                    Picked::Many(values) => Value::list(values),
                })
            }
            Value::Tuple(items) => {
                sequence_item(items, index, "tuple").map(|picked| match picked {
                    Picked::One(value) => value,
                    Picked::Many(values) => Value::tuple(values),
                })
            }
            Value::Str(text) => {
                let chars: Vec<Value> = text.chars().map(|c| Value::Str(c.to_string())).collect();
                sequence_item(&chars, index, "string").map(|picked| match picked {
                    Picked::One(value) => value,
                    Picked::Many(values) => {
                        Value::Str(values.iter().filter_map(Value::as_str).collect())
                    }
                })
            }
            Value::Dict(entries) => {
                let key = DictKey::from_value(index)?;
                entries
                    .borrow()
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| ScriptError::new("KeyError", repr(index)))
            }
            Value::Frame(_) | Value::Series(_) | Value::GroupBy(_) | Value::Accessor(_) => {
                pandas::get_item(self, container, index)
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub fn set_item(&mut self, container: &Value, index: &Value, value: Value) -> Result<(), ScriptError> {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let position = index
                    .as_i64()
                    .ok_or_else(|| {
                        ScriptError::type_error(format!(
                            "list indices must be integers or slices, not {}",
                            index.type_name()
                        ))
                    })
                    .and_then(|i| normalize_index(i, items.len(), "list assignment"))?;
                items[position] = value;
                Ok(())
            }
            Value::Dict(entries) => {
                let key = DictKey::from_value(index)?;
                entries.borrow_mut().insert(key, value);
                Ok(())
            }
            Value::Frame(_) | Value::Accessor(_) => pandas::set_item(self, container, index, value),
            other => Err(ScriptError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    /// Materializes the items a `for` loop would visit.
    pub fn iterate(&mut self, value: &Value) -> Result<Vec<Value>, ScriptError> {
        let items = match value {
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            Value::Str(text) => text.chars().map(|c| Value::Str(c.to_string())).collect(),
            Value::Dict(entries) => entries.borrow().keys().map(DictKey::to_value).collect(),
            Value::Frame(_) | Value::Series(_) | Value::GroupBy(_) => pandas::iterate(value)?,
            other => {
                return Err(ScriptError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        self.consume(items.len() as u64 / 16)?;
        Ok(items)
    }
}

enum Picked {
    One(Value),
    Many(Vec<Value>),
}

pub fn normalize_index(index: i64, len: usize, what: &str) -> Result<usize, ScriptError> {
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let adjusted = if index < 0 { index + signed_len } else { index };
    if adjusted < 0 || adjusted >= signed_len {
        return Err(ScriptError::index_error(format!("{what} index out of range")));
    }
    Ok(adjusted as usize)
}

fn sequence_item(items: &[Value], index: &Value, what: &str) -> Result<Picked, ScriptError> {
    match index {
        Value::Slice(slice) => {
            let picked = slice
                .indices(items.len())?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(Picked::Many(picked))
        }
        other => match other.as_i64() {
            Some(i) => Ok(Picked::One(items[normalize_index(i, items.len(), what)?].clone())),
            None => Err(ScriptError::type_error(format!(
                "{what} indices must be integers or slices, not {}",
                other.type_name()
            ))),
        },
    }
}

fn import_module(name: &str) -> Result<Value, ScriptError> {
    match name {
        "pandas" => Ok(Value::Module(Module::Pandas)),
        "numpy" => Ok(Value::Module(Module::Numpy)),
        "datetime" => Ok(Value::Module(Module::DatetimeModule)),
        other => Err(ScriptError::module_not_found(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse;

    fn run(source: &str) -> (Interpreter, Result<(), ScriptError>) {
        let program = parse(source).unwrap();
        let mut interpreter = Interpreter::new(SandboxLimits::default(), None);
        let outcome = interpreter.run(&program);
        (interpreter, outcome)
    }

    fn global_int(interpreter: &Interpreter, name: &str) -> i64 {
        interpreter.global(name).and_then(|v| v.as_i64()).unwrap()
    }

    #[test]
    fn functions_loops_and_closures() {
        let (interpreter, outcome) = run(
            "def scale(values, factor=2):\n    return [v * factor for v in values if v > 1]\n\
             total = 0\nfor v in scale([1, 2, 3], factor=3):\n    total += v\n",
        );
        outcome.unwrap();
        assert_eq!(global_int(&interpreter, "total"), 15);
    }

    #[test]
    fn try_except_binds_and_finally_runs() {
        let (interpreter, outcome) = run(
            "steps = 0\ntry:\n    {}['missing']\nexcept KeyError as e:\n    steps = 1\nfinally:\n    steps += 10\n",
        );
        outcome.unwrap();
        assert_eq!(global_int(&interpreter, "steps"), 11);
    }

    #[test]
    fn uncaught_errors_carry_a_trace() {
        let (_, outcome) = run("def ratio(x):\n    return x / 0\n\ny = ratio(4)\n");
        let err = outcome.unwrap_err();
        assert_eq!(err.kind, "ZeroDivisionError");
        let lines: Vec<usize> = err.trace.iter().map(|frame| frame.line).collect();
        assert_eq!(lines, vec![4, 2]);
        assert_eq!(err.trace[1].scope, "ratio");
    }

    #[test]
    fn gas_exhaustion_cannot_be_caught() {
        let program = parse("try:\n    while True:\n        pass\nexcept Exception:\n    caught = 1\n").unwrap();
        let limits = SandboxLimits {
            gas_limit: 500,
            ..SandboxLimits::default()
        };
        let mut interpreter = Interpreter::new(limits, None);
        let err = interpreter.run(&program).unwrap_err();
        assert!(err.fatal);
        assert!(interpreter.global("caught").is_none());
    }

    #[test]
    fn unknown_names_suggest_close_matches() {
        let (_, outcome) = run("revenue = 1\nx = revenu + 1\n");
        let err = outcome.unwrap_err();
        assert_eq!(err.kind, "NameError");
        assert!(err.message.contains("Did you mean: 'revenue'?"));
    }

    #[test]
    fn imports_outside_the_allowlist_fail() {
        let (_, outcome) = run("import requests\n");
        assert_eq!(outcome.unwrap_err().kind, "ModuleNotFoundError");
        let (interpreter, outcome) = run("from datetime import timedelta\nd = timedelta(days=2)\n");
        outcome.unwrap();
        assert!(matches!(interpreter.global("d"), Some(Value::Delta(_))));
    }

    #[test]
    fn oversized_sequences_raise_memory_error() {
        for source in [
            "x = [0] * 10**12\n",
            "x = 'a' * 10**10\n",
            "x = (1, 2) * 10**12\n",
            "x = 'ab'.ljust(10**12)\n",
            "x = 'a' * 1000\nx = x.replace('a', 'bbbbbbbbbb' * 10000)\n",
        ] {
            let (_, outcome) = run(source);
            let err = outcome.unwrap_err();
            assert_eq!(err.kind, "MemoryError", "{source}");
            assert!(!err.trace.is_empty());
        }
        let limits = SandboxLimits {
            max_collection_len: 1_000,
            ..SandboxLimits::default()
        };
        for source in [
            "x = [1]\nfor _ in range(40):\n    x += x\n",
            "x = [1]\nfor _ in range(40):\n    x.extend(x)\n",
            "s = 'ab'\nfor _ in range(40):\n    s = s + s\n",
        ] {
            let mut interpreter = Interpreter::new(limits.clone(), None);
            let err = interpreter.run(&parse(source).unwrap()).unwrap_err();
            assert_eq!(err.kind, "MemoryError", "{source}");
        }
        let (interpreter, outcome) = run(
            "try:\n    x = [0] * 10**12\nexcept MemoryError:\n    caught = 1\n",
        );
        outcome.unwrap();
        assert_eq!(global_int(&interpreter, "caught"), 1);
    }

    #[test]
    fn integer_overflow_raises_instead_of_panicking() {
        let (_, outcome) = run("x = (-9223372036854775807 - 1) // -1\n");
        assert_eq!(outcome.unwrap_err().kind, "OverflowError");
        let (_, outcome) = run("x = abs(-9223372036854775807 - 1)\n");
        assert_eq!(outcome.unwrap_err().kind, "OverflowError");
        let (interpreter, outcome) = run("x = (-9223372036854775807 - 1) % -1\n");
        outcome.unwrap();
        assert_eq!(global_int(&interpreter, "x"), 0);
    }

    #[test]
    fn repetition_is_charged_by_size() {
        let program = parse("x = [0] * 160000\n").unwrap();
        let mut interpreter = Interpreter::new(SandboxLimits::default(), None);
        interpreter.run(&program).unwrap();
        assert!(interpreter.gas_used() >= 10_000);

        let limits = SandboxLimits {
            gas_limit: 5_000,
            ..SandboxLimits::default()
        };
        let mut interpreter = Interpreter::new(limits, None);
        let err = interpreter.run(&program).unwrap_err();
        assert!(err.fatal);

        let limits = SandboxLimits {
            max_collection_len: 100,
            ..SandboxLimits::default()
        };
        let mut interpreter = Interpreter::new(limits, None);
        let err = interpreter.run(&parse("x = [0] * 101\n").unwrap()).unwrap_err();
        assert_eq!(err.message, "cannot build a sequence of 101 elements (limit is 100)");
    }

    #[test]
    fn output_is_truncated_at_the_limit() {
        let program = parse("for i in range(100):\n    print('0123456789')\n").unwrap();
        let limits = SandboxLimits {
            max_output_bytes: 50,
            ..SandboxLimits::default()
        };
        let mut interpreter = Interpreter::new(limits, None);
        interpreter.run(&program).unwrap();
        let output = interpreter.take_output();
        assert!(output.starts_with("0123456789\n"));
        assert!(output.ends_with(TRUNCATION_MARKER));
    }
}
