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

//! `datetime`, `date` and `timedelta` for scripts.

use crate::sandbox::args::Args;
use crate::sandbox::error::ScriptError;
use crate::sandbox::interpreter::Interpreter;
use crate::sandbox::value::{Module, Value};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

const INFERRED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const INFERRED_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d %B %Y", "%B %d, %Y", "%Y%m%d"];

/// Python's `%f` is microseconds; chrono's is nanoseconds.
pub fn chrono_format(format: &str) -> String {
    format.replace("%f", "%6f")
}

/// Parses with an explicit format, or tries the common ISO-like layouts.
pub fn parse_datetime(text: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Some(format) = format {
        let format = chrono_format(format);
        return NaiveDateTime::parse_from_str(text, &format).ok().or_else(|| {
            NaiveDate::parse_from_str(text, &format)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        });
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    INFERRED_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            INFERRED_DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .map(|d| d.and_time(NaiveTime::MIN))
        })
        .or_else(|| {
            // Month precision, e.g. "2024-03".
            NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn component(args: &Args, index: usize, name: &str, default: Option<i64>, func: &str) -> Result<i64, ScriptError> {
    match (args.opt(index, name), default) {
        (Some(value), _) => value.as_i64().ok_or_else(|| {
            ScriptError::type_error(format!(
                "'{name}' must be an integer, not '{}'",
                value.type_name()
            ))
        }),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(ScriptError::type_error(format!(
            "{func}() missing required argument '{name}'"
        ))),
    }
}

fn build_date(year: i64, month: i64, day: i64) -> Result<NaiveDate, ScriptError> {
    if !(1..=12).contains(&month) {
        return Err(ScriptError::value_error("month must be in 1..12"));
    }
    let year = i32::try_from(year).map_err(|_| ScriptError::value_error(format!("year {year} is out of range")))?;
    NaiveDate::from_ymd_opt(year, month as u32, u32::try_from(day).unwrap_or(0))
        .ok_or_else(|| ScriptError::value_error("day is out of range for month"))
}

fn build_time(hour: i64, minute: i64, second: i64, micros: i64) -> Result<NaiveTime, ScriptError> {
    let part = |v: i64| u32::try_from(v).unwrap_or(u32::MAX);
    NaiveTime::from_hms_micro_opt(part(hour), part(minute), part(second), part(micros))
        .ok_or_else(|| ScriptError::value_error("time component out of range"))
}

/// Sum of timedelta-style keyword components.
pub fn delta_from_args(args: &Args) -> Result<Duration, ScriptError> {
    const UNITS: &[(&str, f64)] = &[
        ("days", 86_400_000_000.0),
        ("seconds", 1_000_000.0),
        ("microseconds", 1.0),
        ("milliseconds", 1_000.0),
        ("minutes", 60_000_000.0),
        ("hours", 3_600_000_000.0),
        ("weeks", 604_800_000_000.0),
    ];
    let mut micros = 0.0;
    for (index, (unit, scale)) in UNITS.iter().enumerate() {
        if let Some(value) = args.opt(index, unit) {
            let amount = value.as_f64().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "unsupported type for timedelta {unit} component: {}",
                    value.type_name()
                ))
            })?;
            micros += amount * scale;
        }
    }
    if !micros.is_finite() || micros.abs() > 1.0e17 {
        return Err(ScriptError::new("OverflowError", "timedelta out of range"));
    }
    Ok(Duration::microseconds(micros.round() as i64))
}

pub fn construct(module: Module, args: &Args) -> Result<Value, ScriptError> {
    match module {
        Module::DatetimeClass | Module::DateClass => {
            let func = module.name();
            let date = build_date(
                component(args, 0, "year", None, func)?,
                component(args, 1, "month", None, func)?,
                component(args, 2, "day", None, func)?,
            )?;
            if module == Module::DateClass {
                return Ok(Value::Date(date));
            }
            let time = build_time(
                component(args, 3, "hour", Some(0), func)?,
                component(args, 4, "minute", Some(0), func)?,
                component(args, 5, "second", Some(0), func)?,
                component(args, 6, "microsecond", Some(0), func)?,
            )?;
            Ok(Value::DateTime(date.and_time(time)))
        }
        Module::TimedeltaClass => delta_from_args(args).map(Value::Delta),
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            other.name()
        ))),
    }
}

pub fn attribute(value: &Value, attr: &str) -> Option<Value> {
    let int = |v: u32| Some(Value::Int(i64::from(v)));
    match (value, attr) {
        (Value::Module(Module::DatetimeModule), "datetime") => {
            Some(Value::Module(Module::DatetimeClass))
        }
        (Value::Module(Module::DatetimeModule), "date") => Some(Value::Module(Module::DateClass)),
        (Value::Module(Module::DatetimeModule), "timedelta") => {
            Some(Value::Module(Module::TimedeltaClass))
        }
        (
            Value::Module(Module::DatetimeClass),
            "now" | "today" | "strptime" | "fromisoformat" | "combine",
        )
        | (Value::Module(Module::DateClass), "today" | "fromisoformat")
        | (
            Value::Date(_),
            "strftime" | "isoformat" | "weekday" | "isoweekday" | "replace",
        )
        | (
            Value::DateTime(_),
            "strftime" | "isoformat" | "weekday" | "isoweekday" | "replace" | "date"
            | "normalize" | "timestamp",
        )
        | (Value::Delta(_), "total_seconds") => Some(Value::method(value.clone(), attr)),
        (Value::Date(d), "year") => Some(Value::Int(i64::from(d.year()))),
        (Value::Date(d), "month") => int(d.month()),
        (Value::Date(d), "day") => int(d.day()),
        (Value::DateTime(dt), "year") => Some(Value::Int(i64::from(dt.year()))),
        (Value::DateTime(dt), "month") => int(dt.month()),
        (Value::DateTime(dt), "day") => int(dt.day()),
        (Value::DateTime(dt), "hour") => int(dt.hour()),
        (Value::DateTime(dt), "minute") => int(dt.minute()),
        (Value::DateTime(dt), "second") => int(dt.second()),
        (Value::DateTime(dt), "microsecond") => int(dt.nanosecond() / 1_000),
        (Value::Delta(d), "days") => Some(Value::Int(d.num_days())),
        (Value::Delta(d), "seconds") => Some(Value::Int(d.num_seconds() - d.num_days() * 86_400)),
        _ => None,
    }
}

fn replace_parts(date: NaiveDate, time: NaiveTime, args: &Args) -> Result<NaiveDateTime, ScriptError> {
    let kw = |name: &str, current: i64| -> Result<i64, ScriptError> {
        match args.kw(name) {
            Some(value) => value.as_i64().ok_or_else(|| {
                ScriptError::type_error(format!("'{name}' must be an integer"))
            }),
            None => Ok(current),
        }
    };
    let date = build_date(
        kw("year", i64::from(date.year()))?,
        kw("month", i64::from(date.month()))?,
        kw("day", i64::from(date.day()))?,
    )?;
    let time = build_time(
        kw("hour", i64::from(time.hour()))?,
        kw("minute", i64::from(time.minute()))?,
        kw("second", i64::from(time.second()))?,
        kw("microsecond", i64::from(time.nanosecond() / 1_000))?,
    )?;
    Ok(date.and_time(time))
}

fn text_arg(args: &Args, index: usize, name: &str, func: &str) -> Result<String, ScriptError> {
    args.text(index, name)?.ok_or_else(|| {
        ScriptError::type_error(format!("{func}() missing required argument '{name}'"))
    })
}

pub fn call_method(
    _interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Result<Value, ScriptError> {
    let value = match (receiver, name) {
        (Value::Module(Module::DatetimeClass), "now" | "today") => {
            Value::DateTime(Local::now().naive_local())
        }
        (Value::Module(Module::DateClass), "today") => Value::Date(Local::now().date_naive()),
        (Value::Module(Module::DatetimeClass), "strptime") => {
            let text = text_arg(&args, 0, "date_string", name)?;
            let format = text_arg(&args, 1, "format", name)?;
            let parsed = parse_datetime(&text, Some(&format)).ok_or_else(|| {
                ScriptError::value_error(format!(
                    "time data '{text}' does not match format '{format}'"
                ))
            })?;
            Value::DateTime(parsed)
        }
        (Value::Module(module @ (Module::DatetimeClass | Module::DateClass)), "fromisoformat") => {
            let text = text_arg(&args, 0, "date_string", name)?;
            let parsed = parse_datetime(&text, None).ok_or_else(|| {
                ScriptError::value_error(format!("Invalid isoformat string: '{text}'"))
            })?;
            if *module == Module::DateClass {
                Value::Date(parsed.date())
            } else {
                Value::DateTime(parsed)
            }
        }
        (Value::Module(Module::DatetimeClass), "combine") => {
            match (args.positional.first(), args.positional.get(1)) {
                (Some(Value::Date(d)), None) => Value::DateTime(d.and_time(NaiveTime::MIN)),
                (Some(Value::Date(d)), Some(Value::DateTime(t))) => Value::DateTime(d.and_time(t.time())),
                _ => return Err(ScriptError::type_error("combine() argument 1 must be datetime.date")),
            }
        }
        (Value::Date(d), "strftime") => {
            let format = text_arg(&args, 0, "format", name)?;
            Value::Str(d.format(&chrono_format(&format)).to_string())
        }
        (Value::DateTime(dt), "strftime") => {
            let format = text_arg(&args, 0, "format", name)?;
            Value::Str(dt.format(&chrono_format(&format)).to_string())
        }
        (Value::Date(d), "isoformat") => Value::Str(d.format("%Y-%m-%d").to_string()),
        (Value::DateTime(dt), "isoformat") => {
            let sep = args.text(0, "sep")?.unwrap_or_else(|| "T".to_string());
            Value::Str(dt.format(&format!("%Y-%m-%d{sep}%H:%M:%S")).to_string())
        }
        (Value::Date(d), "weekday") => Value::Int(i64::from(d.weekday().num_days_from_monday())),
        (Value::DateTime(dt), "weekday") => {
            Value::Int(i64::from(dt.weekday().num_days_from_monday()))
        }
        (Value::Date(d), "isoweekday") => Value::Int(i64::from(d.weekday().number_from_monday())),
        (Value::DateTime(dt), "isoweekday") => {
            Value::Int(i64::from(dt.weekday().number_from_monday()))
        }
        (Value::Date(d), "replace") => Value::Date(replace_parts(*d, NaiveTime::MIN, &args)?.date()),
        (Value::DateTime(dt), "replace") => Value::DateTime(replace_parts(dt.date(), dt.time(), &args)?),
        (Value::DateTime(dt), "date") => Value::Date(dt.date()),
        (Value::DateTime(dt), "normalize") => Value::DateTime(dt.date().and_time(NaiveTime::MIN)),
        (Value::DateTime(dt), "timestamp") => {
            Value::Float(dt.and_utc().timestamp_micros() as f64 / 1_000_000.0)
        }
        (Value::Delta(d), "total_seconds") => {
            let micros = d.num_microseconds().unwrap_or(i64::MAX);
            Value::Float(micros as f64 / 1_000_000.0)
        }
        (other, _) => return Err(ScriptError::attribute_error(&other.type_name(), name)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inferred_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap().and_time(NaiveTime::MIN);
        for text in ["2024-03-09", "2024/03/09", "03/09/2024", "2024-03-09T00:00:00"] {
            assert_eq!(parse_datetime(text, None), Some(expected), "{text}");
        }
        let month = parse_datetime("2024-03", None).unwrap();
        assert_eq!(month.date().day(), 1);
        assert_eq!(parse_datetime("last tuesday", None), None);
    }

    #[test]
    fn explicit_formats_accept_python_directives() {
        let parsed = parse_datetime("09.03.2024 14:05:06.250000", Some("%d.%m.%Y %H:%M:%S.%f")).unwrap();
        assert_eq!(parsed.hour(), 14);
        assert_eq!(parsed.nanosecond(), 250_000_000);
    }

    #[test]
    fn timedelta_components_accumulate() {
        let args = Args::new(
            vec![Value::Int(1)],
            vec![("hours".into(), Value::Float(1.5))],
        );
        let delta = delta_from_args(&args).unwrap();
        assert_eq!(delta.num_minutes(), 24 * 60 + 90);
    }

    #[test]
    fn constructors_validate_ranges() {
        let args = Args::of(vec![Value::Int(2024), Value::Int(2), Value::Int(30)]);
        let err = construct(Module::DateClass, &args).unwrap_err();
        assert_eq!(err.message, "day is out of range for month");
    }
}
