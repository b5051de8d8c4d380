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

//! Text rendering of script values: `str()`, `repr()` and format specs.

use crate::sandbox::error::ScriptError;
use crate::sandbox::value::{Module, SeriesValue, Value};
use crate::tabular::{Cell, Table};
use chrono::Duration;

pub fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = v.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        return exponent_form(&format!("{v:e}"));
    }
    if v.fract() == 0.0 {
        return format!("{v:.1}");
    }
    format!("{v}")
}

/// Rewrites Rust's `1.5e-7` exponent style into `1.5e-07`.
fn exponent_form(rust: &str) -> String {
    match rust.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => rust.to_string(),
    }
}

fn quote(text: &str) -> String {
    let delimiter = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(delimiter);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

fn delta_str(delta: &Duration) -> String {
    let days = delta.num_days();
    let rest = *delta - Duration::days(days);
    let secs = rest.num_seconds();
    format!(
        "{days} days {:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

pub fn repr(value: &Value) -> String {
    match value {
        Value::Str(v) => quote(v),
        Value::List(items) => {
            let inner: Vec<String> = items.borrow().iter().map(repr).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Tuple(items) if items.len() == 1 => format!("({},)", repr(&items[0])),
        Value::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(repr).collect();
            format!("({})", inner.join(", "))
        }
        Value::Dict(entries) => {
            let inner: Vec<String> = entries
                .borrow()
                .iter()
                .map(|(k, v)| format!("{}: {}", repr(&k.to_value()), repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        Value::Date(d) => format!("datetime.date({}, {}, {})", d.format("%Y"), d.format("%-m"), d.format("%-d")),
        Value::DateTime(dt) => format!("Timestamp('{}')", dt.format("%Y-%m-%d %H:%M:%S")),
        Value::Delta(d) => format!("Timedelta('{}')", delta_str(d)),
        Value::Exception(e) => format!("{}({})", e.kind, quote(&e.message)),
        other => to_str(other),
    }
}

pub fn to_str(value: &Value) -> String {
    match value {
        Value::None => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => float_repr(*v),
        Value::Str(v) => v.clone(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Value::Delta(d) => delta_str(d),
        Value::Frame(table) => render_table(&table.borrow()),
        Value::Series(series) => render_series(series),
        Value::Module(module @ (Module::DatetimeClass | Module::DateClass | Module::TimedeltaClass)) => {
            format!("<class '{}'>", module.name())
        }
        Value::Module(module) => format!("<module '{}'>", module.name()),
        Value::Connection => "<read-only connection>".to_string(),
        Value::Function(f) => format!("<function {}>", f.name),
        Value::Builtin(name) => format!("<built-in function {name}>"),
        Value::Method(method) => format!("<bound method {}.{}>", method.0.type_name(), method.1),
        Value::ExceptionClass(kind) => format!("<class '{kind}'>"),
        Value::Exception(e) => e.message.clone(),
        Value::GroupBy(_) | Value::Accessor(_) | Value::Slice(_) => {
            format!("<{} object>", value.type_name())
        }
        other => repr(other),
    }
}

pub fn cell_display(cell: &Cell) -> String {
    match cell {
        Cell::Null => "NaN".to_string(),
        Cell::Float(v) => {
            let fixed = format!("{v:.6}");
            let trimmed = fixed.trim_end_matches('0');
            if trimmed.ends_with('.') {
                format!("{trimmed}0")
            } else {
                trimmed.to_string()
            }
        }
        Cell::Bool(v) => if *v { "True" } else { "False" }.to_string(),
        other => to_str(&Value::from_cell(other.clone())),
    }
}

const DISPLAY_ROWS: usize = 60;
const DISPLAY_EDGE: usize = 5;

fn visible_rows(height: usize) -> Vec<Option<usize>> {
    if height <= DISPLAY_ROWS {
        return (0..height).map(Some).collect();
    }
    (0..DISPLAY_EDGE)
        .map(Some)
        .chain(std::iter::once(None))
        .chain((height - DISPLAY_EDGE..height).map(Some))
        .collect()
}

pub fn render_table(table: &Table) -> String {
    if table.width() == 0 {
        return "Empty DataFrame\nColumns: []".to_string();
    }
    let rows = visible_rows(table.height());
    let mut grid: Vec<Vec<String>> = Vec::with_capacity(rows.len() + 1);
    let mut header = vec![String::new()];
    header.extend(table.column_names());
    grid.push(header);
    for row in &rows {
        let line = match row {
            Some(i) => std::iter::once(i.to_string())
                .chain(table.columns().iter().map(|(_, data)| cell_display(&data.get(*i))))
                .collect(),
            None => vec!["...".to_string(); table.width() + 1],
        };
        grid.push(line);
    }
    let widths: Vec<usize> = (0..=table.width())
        .map(|c| grid.iter().map(|line| line[c].chars().count()).max().unwrap_or(0))
        .collect();
    let mut out: Vec<String> = grid
        .iter()
        .map(|line| {
            line.iter()
                .zip(&widths)
                .enumerate()
                .map(|(c, (cell, width))| {
                    if c == 0 {
                        format!("{cell:<width$}")
                    } else {
                        format!("{cell:>width$}")
                    }
                })
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        })
        .collect();
    if table.height() > DISPLAY_ROWS {
        out.push(String::new());
        out.push(format!("[{} rows x {} columns]", table.height(), table.width()));
    }
    out.join("\n")
}

pub fn render_series(series: &SeriesValue) -> String {
    let rows = visible_rows(series.len());
    let index_width = series.len().saturating_sub(1).to_string().len();
    let mut out: Vec<String> = rows
        .iter()
        .map(|row| match row {
            Some(i) => format!("{i:<index_width$}    {}", cell_display(&series.data.get(*i))),
            None => "...".to_string(),
        })
        .collect();
    let name = series
        .name
        .as_ref()
        .map(|name| format!("Name: {name}, "))
        .unwrap_or_default();
    out.push(format!("{name}dtype: {}", series.data.dtype_name()));
    out.join("\n")
}

#[derive(Debug, Default)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: Option<usize>,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

/// Widest padding or precision a format spec may request.
const MAX_FIELD_WIDTH: usize = 1 << 20;

fn field_width(digits: &[char]) -> Result<usize, ScriptError> {
    digits
        .iter()
        .collect::<String>()
        .parse::<usize>()
        .ok()
        .filter(|width| *width <= MAX_FIELD_WIDTH)
        .ok_or_else(|| {
            ScriptError::memory_error(format!(
                "format field width exceeds the {MAX_FIELD_WIDTH} character limit"
            ))
        })
}

fn parse_spec(spec: &str) -> Result<Spec, ScriptError> {
    let chars: Vec<char> = spec.chars().collect();
    let invalid = || ScriptError::value_error(format!("Invalid format specifier '{spec}'"));
    let mut parsed = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            parsed.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'#') {
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        parsed.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        parsed.width = Some(field_width(&chars[start..i])?);
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            parsed.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(invalid());
        }
        parsed.precision = Some(field_width(&chars[start..i])?);
    }
    if let Some(&c) = chars.get(i) {
        parsed.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid());
    }
    Ok(parsed)
}

fn group_digits(digits: &str, separator: char) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

fn apply_grouping(body: &str, separator: Option<char>) -> String {
    let Some(separator) = separator else {
        return body.to_string();
    };
    let (int_part, rest) = match body.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => body.split_at(pos),
        None => (body, ""),
    };
    format!("{}{rest}", group_digits(int_part, separator))
}

fn general(v: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if v == 0.0 {
        return "0".to_string();
    }
    let exponent = v.abs().log10().floor() as i32;
    let p = i32::try_from(precision).unwrap_or(i32::MAX);
    if exponent < -4 || exponent >= p {
        let formatted = format!("{:.*e}", precision - 1, v);
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let mantissa = strip_zeros(mantissa);
        return exponent_form(&format!("{mantissa}e{exp}"));
    }
    let decimals = usize::try_from(p - 1 - exponent).unwrap_or(0);
    strip_zeros(&format!("{v:.decimals$}"))
}

fn strip_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

fn number_body(value: &Value, spec: &Spec) -> Result<Option<(bool, String)>, ScriptError> {
    let Some(number) = value.as_f64() else {
        return Ok(None);
    };
    let negative = number < 0.0;
    let magnitude = number.abs();
    let body = match (spec.kind, value) {
        (None | Some('d' | 'n'), Value::Int(_) | Value::Bool(_)) if spec.precision.is_none() => {
            value.as_i64().unwrap_or_default().unsigned_abs().to_string()
        }
        (Some('d'), _) => {
            if number.fract() != 0.0 {
                return Err(ScriptError::value_error(
                    "Unknown format code 'd' for object of type 'float'",
                ));
            }
            format!("{magnitude:.0}")
        }
        (Some('f' | 'F'), _) => format!("{magnitude:.*}", spec.precision.unwrap_or(6)),
        (Some('%'), _) => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
        (Some('e' | 'E'), _) => {
            exponent_form(&format!("{magnitude:.*e}", spec.precision.unwrap_or(6)))
        }
        (Some('g' | 'G'), _) => general(magnitude, spec.precision.unwrap_or(6)),
        (None, _) => match spec.precision {
            Some(p) => general(magnitude, p),
            None => float_repr(magnitude),
        },
        (Some(kind), _) => {
            return Err(ScriptError::value_error(format!(
                "Unknown format code '{kind}' for object of type '{}'",
                value.type_name()
            )))
        }
    };
    Ok(Some((negative, apply_grouping(&body, spec.grouping))))
}

fn pad(body: String, spec: &Spec, default_align: char) -> String {
    let Some(width) = spec.width else {
        return body;
    };
    let len = body.chars().count();
    if len >= width {
        return body;
    }
    let fill = spec.fill.unwrap_or(' ');
    let gap = width - len;
    let filler = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{body}{}", filler(gap)),
        '^' => format!("{}{body}{}", filler(gap / 2), filler(gap - gap / 2)),
        _ => format!("{}{body}", filler(gap)),
    }
}

/// Applies a format spec such as `,.2f`, `>10` or `.1%` to a value.
pub fn format_value(value: &Value, spec: &str) -> Result<String, ScriptError> {
    if spec.is_empty() {
        return Ok(to_str(value));
    }
    if let Value::Date(d) = value {
        return Ok(d.format(spec).to_string());
    }
    if let Value::DateTime(dt) = value {
        return Ok(dt.format(spec).to_string());
    }
    let parsed = parse_spec(spec)?;
    if !matches!(value, Value::Str(_)) {
        if let Some((negative, body)) = number_body(value, &parsed)? {
            let sign = match (negative, parsed.sign) {
                (true, _) => "-",
                (false, Some('+')) => "+",
                (false, Some(' ')) => " ",
                _ => "",
            };
            if parsed.zero && parsed.align.is_none() {
                if let Some(width) = parsed.width {
                    let digits = width.saturating_sub(sign.len());
                    return Ok(format!("{sign}{body:0>digits$}"));
                }
            }
            return Ok(pad(format!("{sign}{body}"), &parsed, '>'));
        }
    }
    if parsed.kind.is_some_and(|k| k != 's') {
        return Err(ScriptError::value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            parsed.kind.unwrap_or('s'),
            value.type_name()
        )));
    }
    let mut text = to_str(value);
    if let Some(precision) = parsed.precision {
        text = text.chars().take(precision).collect();
    }
    Ok(pad(text, &parsed, '<'))
}

/// printf-style `%` interpolation: `"%.2f" % x`, `"%s-%s" % (a, b)`.
pub fn percent_format(template: &str, args: &Value) -> Result<String, ScriptError> {
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut remaining = values.into_iter();
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut flags = String::new();
        while let Some(&f) = chars.peek() {
            if !matches!(f, '-' | '+' | ' ' | '0') {
                break;
            }
            flags.push(f);
            chars.next();
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(d);
                chars.next();
            }
            precision = Some(if digits.is_empty() { "0".to_string() } else { digits });
        }
        let Some(code) = chars.next() else {
            return Err(ScriptError::value_error("incomplete format"));
        };
        if code == '%' {
            out.push('%');
            continue;
        }
        let value = remaining.next().ok_or_else(|| {
            ScriptError::type_error("not enough arguments for format string")
        })?;
        let mut spec = String::new();
        if flags.contains('-') {
            spec.push('<');
        }
        if let Some(sign) = flags.chars().find(|f| matches!(f, '+' | ' ')) {
            spec.push(sign);
        }
        if flags.contains('0') && !flags.contains('-') {
            spec.push('0');
        }
        spec.push_str(&width);
        if let Some(precision) = &precision {
            spec.push('.');
            spec.push_str(precision);
        }
        let rendered = match code {
            's' => format_value(&Value::Str(to_str(&value)), &spec)?,
            'r' => format_value(&Value::Str(repr(&value)), &spec)?,
            'd' | 'i' => {
                let whole = match &value {
                    Value::Float(v) => Value::Int(v.trunc() as i64),
                    other => other.clone(),
                };
                format_value(&whole, &format!("{spec}d"))?
            }
            'f' | 'F' | 'e' | 'g' => format_value(&value, &format!("{spec}{code}"))?,
            other => {
                return Err(ScriptError::value_error(format!(
                    "unsupported format character '{other}'"
                )))
            }
        };
        out.push_str(&rendered);
    }
    if remaining.next().is_some() {
        return Err(ScriptError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).unwrap()
    }

    #[test]
    fn floats_render_like_scripts_expect() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(0.00001), "1e-05");
    }

    #[test]
    fn format_specs() {
        assert_eq!(fmt(Value::Float(1234567.891), ",.2f"), "1,234,567.89");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(0.256), ".1%"), "25.6%");
        assert_eq!(fmt(Value::Float(-3.5), "08.2f"), "-0003.50");
        assert_eq!(fmt(Value::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::Int(7), "*^5"), "**7**");
        assert_eq!(fmt(Value::Float(1234.5), ".3g"), "1.23e+03");
    }

    #[test]
    fn oversized_field_widths_are_refused() {
        let err = format_value(&Value::Int(1), ">1000000000000").unwrap_err();
        assert_eq!(err.kind, "MemoryError");
        let err = format_value(&Value::Float(1.0), ".99999999999999999999999f").unwrap_err();
        assert_eq!(err.kind, "MemoryError");
        let err = percent_format("%2000000d", &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, "MemoryError");
        assert_eq!(fmt(Value::Int(1), ">3"), "  1");
    }

    #[test]
    fn reprs_quote_strings() {
        assert_eq!(repr(&Value::str("it's")), "\"it's\"");
        assert_eq!(repr(&Value::tuple(vec![Value::Int(1)])), "(1,)");
        assert_eq!(to_str(&Value::list(vec![Value::str("a"), Value::None])), "['a', None]");
    }

    #[test]
    fn bad_specs_are_value_errors() {
        let err = format_value(&Value::str("x"), ".2f").unwrap_err();
        assert_eq!(err.kind, "ValueError");
    }

    #[test]
    fn percent_interpolation_handles_tuples() {
        let args = Value::tuple(vec![Value::str("east"), Value::Float(12.345)]);
        assert_eq!(percent_format("%s: %.1f%%", &args).unwrap(), "east: 12.3%");
        assert_eq!(percent_format("%05d", &Value::Int(42)).unwrap(), "00042");
        assert!(percent_format("%s %s", &Value::Int(1)).is_err());
    }
}
