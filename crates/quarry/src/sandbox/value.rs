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

use crate::sandbox::error::ScriptError;
use crate::script::ast::{Expr, Stmt};
use crate::tabular::{Cell, ColumnData, Table};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// Importable namespaces and callable classes reachable from scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Pandas,
    Numpy,
    DatetimeModule,
    DatetimeClass,
    DateClass,
    TimedeltaClass,
}

impl Module {
    pub fn name(self) -> &'static str {
        match self {
            Module::Pandas => "pandas",
            Module::Numpy => "numpy",
            Module::DatetimeModule => "datetime",
            Module::DatetimeClass => "datetime",
            Module::DateClass => "date",
            Module::TimedeltaClass => "timedelta",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Tuple(Vec<DictKey>),
}

impl DictKey {
    pub fn from_value(value: &Value) -> Result<Self, ScriptError> {
        let key = match value {
            Value::None => DictKey::None,
            Value::Bool(v) => DictKey::Bool(*v),
            Value::Int(v) => DictKey::Int(*v),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => DictKey::Int(*v as i64),
            Value::Float(v) => DictKey::Float(v.to_bits()),
            Value::Str(v) => DictKey::Str(v.clone()),
            Value::Date(v) => DictKey::Date(*v),
            Value::DateTime(v) => DictKey::DateTime(*v),
            Value::Tuple(items) => DictKey::Tuple(
                items
                    .iter()
                    .map(DictKey::from_value)
                    .collect::<Result<_, _>>()?,
            ),
            other => {
                return Err(ScriptError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        };
        Ok(key)
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::None => Value::None,
            DictKey::Bool(v) => Value::Bool(*v),
            DictKey::Int(v) => Value::Int(*v),
            DictKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            DictKey::Str(v) => Value::Str(v.clone()),
            DictKey::Date(v) => Value::Date(*v),
            DictKey::DateTime(v) => Value::DateTime(*v),
            DictKey::Tuple(items) => Value::tuple(items.iter().map(DictKey::to_value).collect()),
        }
    }
}

/// A named column detached from any frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesValue {
    pub name: Option<String>,
    pub data: ColumnData,
}

impl SeriesValue {
    pub fn new(name: Option<String>, data: ColumnData) -> Self {
        Self { name, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GroupByValue {
    pub table: Table,
    pub keys: Vec<String>,
    pub selection: Option<Vec<String>>,
    /// `df.groupby('a')['b']` reduces to a column rather than a frame.
    pub single: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Loc,
    Iloc,
    Str,
    Dt,
}

/// `df.loc`, `df.iloc`, `s.str`, `s.dt`: a view that defers to its owner.
#[derive(Debug, Clone)]
pub struct Accessor {
    pub kind: AccessorKind,
    pub target: Value,
}

pub enum FunctionBody {
    Block(Rc<Vec<Stmt>>),
    Lambda(Rc<Expr>),
}

pub struct Function {
    pub name: String,
    pub params: Vec<(String, Option<Value>)>,
    pub body: FunctionBody,
    pub closure: Option<Scope>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceValue {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

impl SliceValue {
    /// Resolves to concrete positions over a sequence of `len` items.
    pub fn indices(&self, len: usize) -> Result<Vec<usize>, ScriptError> {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(ScriptError::value_error("slice step cannot be zero"));
        }
        let clamp = |bound: i64, low: i64, high: i64| {
            let adjusted = if bound < 0 { bound + len } else { bound };
            adjusted.clamp(low, high)
        };
        let mut positions = Vec::new();
        if step > 0 {
            let start = self.lower.map_or(0, |b| clamp(b, 0, len));
            let stop = self.upper.map_or(len, |b| clamp(b, 0, len));
            let mut i = start;
            while i < stop {
                positions.push(i as usize);
                i += step;
            }
        } else {
            let start = self.lower.map_or(len - 1, |b| clamp(b, -1, len - 1));
            let stop = self.upper.map_or(-1, |b| clamp(b, -1, len - 1));
            let mut i = start;
            while i > stop {
                positions.push(i as usize);
                i += step;
            }
        }
        Ok(positions)
    }
}

pub struct ScopeData {
    pub vars: IndexMap<String, Value>,
    pub parent: Option<Scope>,
}

pub type Scope = Shared<ScopeData>;

pub fn new_scope(parent: Option<Scope>) -> Scope {
    shared(ScopeData {
        vars: IndexMap::new(),
        parent,
    })
}

pub fn lookup(scope: &Scope, name: &str) -> Option<Value> {
    let data = scope.borrow();
    match data.vars.get(name) {
        Some(value) => Some(value.clone()),
        None => data.parent.as_ref().and_then(|parent| lookup(parent, name)),
    }
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Shared<Vec<Value>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Shared<IndexMap<DictKey, Value>>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Delta(Duration),
    Frame(Shared<Table>),
    Series(Rc<SeriesValue>),
    GroupBy(Rc<GroupByValue>),
    Accessor(Rc<Accessor>),
    Module(Module),
    Connection,
    Function(Rc<Function>),
    Builtin(&'static str),
    Method(Rc<(Value, String)>),
    ExceptionClass(String),
    Exception(Rc<Exception>),
    Slice(Rc<SliceValue>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.type_name())
    }
}

impl Value {
    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(shared(items))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(entries: IndexMap<DictKey, Value>) -> Value {
        Value::Dict(shared(entries))
    }

    pub fn frame(table: Table) -> Value {
        Value::Frame(shared(table))
    }

    pub fn series(name: Option<String>, data: ColumnData) -> Value {
        Value::Series(Rc::new(SeriesValue::new(name, data)))
    }

    pub fn method(receiver: Value, name: &str) -> Value {
        Value::Method(Rc::new((receiver, name.to_string())))
    }

    pub fn exception(kind: &str, message: impl Into<String>) -> Value {
        Value::Exception(Rc::new(Exception {
            kind: kind.to_string(),
            message: message.into(),
        }))
    }

    /// The name a script would see from `type(x).__name__`.
    pub fn type_name(&self) -> String {
        let name = match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Date(_) => "date",
            Value::DateTime(_) => "Timestamp",
            Value::Delta(_) => "Timedelta",
            Value::Frame(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::GroupBy(g) if g.single => "SeriesGroupBy",
            Value::GroupBy(_) => "DataFrameGroupBy",
            Value::Accessor(a) => match a.kind {
                AccessorKind::Loc => "_LocIndexer",
                AccessorKind::Iloc => "_iLocIndexer",
                AccessorKind::Str => "StringMethods",
                AccessorKind::Dt => "DatetimeProperties",
            },
            Value::Module(Module::DatetimeClass | Module::DateClass | Module::TimedeltaClass) => {
                "type"
            }
            Value::Module(_) => "module",
            Value::Connection => "Connection",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::ExceptionClass(_) => "type",
            Value::Exception(e) => return e.kind.clone(),
            Value::Slice(_) => "slice",
        };
        name.to_string()
    }

    pub fn from_cell(cell: Cell) -> Value {
        match cell {
            Cell::Null => Value::None,
            Cell::Int(v) => Value::Int(v),
            Cell::Float(v) => Value::Float(v),
            Cell::Bool(v) => Value::Bool(v),
            Cell::Str(v) => Value::Str(v),
            Cell::Date(v) => Value::Date(v),
            Cell::DateTime(v) => Value::DateTime(v),
        }
    }

    /// Scalar view for column construction; `None` when the value is not a scalar.
    pub fn to_cell(&self) -> Option<Cell> {
        let cell = match self {
            Value::None => Cell::Null,
            Value::Bool(v) => Cell::Bool(*v),
            Value::Int(v) => Cell::Int(*v),
            Value::Float(v) => Cell::Float(*v),
            Value::Str(v) => Cell::Str(v.clone()),
            Value::Date(v) => Cell::Date(*v),
            Value::DateTime(v) => Cell::DateTime(*v),
            _ => return None,
        };
        Some(cell)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(v) => Some(f64::from(u8::from(*v))),
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn truthy(&self) -> Result<bool, ScriptError> {
        let truth = match self {
            Value::None => false,
            Value::Bool(v) => *v,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(v) => !v.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
            Value::Delta(d) => !d.is_zero(),
            Value::Frame(_) | Value::Series(_) => {
                return Err(ScriptError::value_error(format!(
                    "The truth value of a {} is ambiguous. Use a.empty, a.bool(), a.item(), a.any() or a.all().",
                    self.type_name()
                )))
            }
            _ => true,
        };
        Ok(truth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_follow_sequence_rules() {
        let slice = |lower, upper, step| SliceValue { lower, upper, step };
        assert_eq!(slice(None, Some(2), None).indices(5).unwrap(), vec![0, 1]);
        assert_eq!(slice(Some(-2), None, None).indices(5).unwrap(), vec![3, 4]);
        assert_eq!(slice(None, None, Some(-2)).indices(5).unwrap(), vec![4, 2, 0]);
        assert!(slice(None, None, Some(0)).indices(5).is_err());
    }

    #[test]
    fn integral_floats_share_int_keys() {
        assert_eq!(
            DictKey::from_value(&Value::Float(2.0)).unwrap(),
            DictKey::from_value(&Value::Int(2)).unwrap()
        );
        assert!(DictKey::from_value(&Value::list(vec![])).is_err());
    }

    #[test]
    fn frames_refuse_truthiness() {
        assert!(Value::frame(Table::default()).truthy().is_err());
        assert!(!Value::str("").truthy().unwrap());
    }
}
