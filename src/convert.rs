/// Type Conversion Module
///
/// This module converts single opaque cell values into requested target
/// types, applying locale-aware parsing rules for textual numbers and
/// dates. Conversion is a pure function of value, target type and locale.
///
/// Rules:
/// - a null cell becomes the target type's zero/default value
/// - same-kind values pass through unchanged
/// - numeric narrowing fails explicitly on overflow instead of wrapping
/// - textual booleans accept "true"/"false"/"0"/"1"
///
/// Anything else fails with a conversion error naming the source value's
/// runtime kind and the requested target kind.
use chrono::{NaiveDate, NaiveDateTime};

use crate::core::{Result, RowcastError};
use crate::driver::Value;

/// Culture-specific parsing and formatting rules.
///
/// The default locale uses `.` as the decimal separator, no grouping
/// separator, and ISO-style date formats.
#[derive(Debug, Clone, PartialEq)]
pub struct Locale {
    pub decimal_separator: char,
    pub grouping_separator: Option<char>,
    pub date_format: String,
    pub datetime_format: String,
}

impl Default for Locale {
    fn default() -> Self {
        Locale {
            decimal_separator: '.',
            grouping_separator: None,
            date_format: "%Y-%m-%d".to_string(),
            datetime_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

impl Locale {
    /// Rewrites a localized numeric string into parseable form: grouping
    /// separators are stripped and the decimal separator becomes `.`.
    fn normalize_number(&self, text: &str) -> String {
        let mut normalized = String::with_capacity(text.len());
        for ch in text.trim().chars() {
            if Some(ch) == self.grouping_separator {
                continue;
            }
            if ch == self.decimal_separator {
                normalized.push('.');
            } else {
                normalized.push(ch);
            }
        }
        normalized
    }

    /// Parses a timestamp, accepting the datetime format first and falling
    /// back to a date-only form at midnight.
    fn parse_timestamp(&self, text: &str) -> Option<NaiveDateTime> {
        let trimmed = text.trim();
        NaiveDateTime::parse_from_str(trimmed, &self.datetime_format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(trimmed, &self.date_format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }

    fn parse_date(&self, text: &str) -> Option<NaiveDate> {
        let trimmed = text.trim();
        NaiveDate::parse_from_str(trimmed, &self.date_format)
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(trimmed, &self.datetime_format)
                    .ok()
                    .map(|ts| ts.date())
            })
    }

    /// Formats a timestamp with this locale's datetime format.
    pub fn format_timestamp(&self, ts: &NaiveDateTime) -> String {
        ts.format(&self.datetime_format).to_string()
    }
}

/// A target type a cell value can be converted into.
pub trait FromValue: Sized {
    /// The target kind name used in conversion diagnostics.
    const TARGET: &'static str;

    /// Converts a cell value into this type under the given locale.
    ///
    /// # Errors
    ///
    /// Returns `RowcastError::Conversion` when the value's representation
    /// cannot be interpreted as this type.
    fn from_value(value: &Value, locale: &Locale) -> Result<Self>;
}

/// Converts a single cell value into the requested target type.
pub fn convert<T: FromValue>(value: &Value, locale: &Locale) -> Result<T> {
    T::from_value(value, locale)
}

fn unconvertible<T: FromValue>(value: &Value) -> RowcastError {
    RowcastError::Conversion {
        from: value.kind(),
        target: T::TARGET,
    }
}

impl FromValue for i64 {
    const TARGET: &'static str = "i64";

    fn from_value(value: &Value, locale: &Locale) -> Result<Self> {
        match value {
            Value::Null => Ok(0),
            Value::Integer(i) => Ok(*i),
            Value::Real(r) => {
                let rounded = r.round();
                if rounded.is_finite()
                    && rounded >= i64::MIN as f64
                    && rounded <= i64::MAX as f64
                {
                    Ok(rounded as i64)
                } else {
                    Err(unconvertible::<Self>(value))
                }
            }
            Value::Text(t) => locale
                .normalize_number(t)
                .parse::<i64>()
                .map_err(|_| unconvertible::<Self>(value)),
            Value::Bool(b) => Ok(if *b { 1 } else { 0 }),
            _ => Err(unconvertible::<Self>(value)),
        }
    }
}

impl FromValue for i32 {
    const TARGET: &'static str = "i32";

    fn from_value(value: &Value, locale: &Locale) -> Result<Self> {
        let wide = i64::from_value(value, locale).map_err(|_| unconvertible::<Self>(value))?;
        i32::try_from(wide).map_err(|_| unconvertible::<Self>(value))
    }
}

impl FromValue for f64 {
    const TARGET: &'static str = "f64";

    fn from_value(value: &Value, locale: &Locale) -> Result<Self> {
        match value {
            Value::Null => Ok(0.0),
            Value::Integer(i) => Ok(*i as f64),
            Value::Real(r) => Ok(*r),
            Value::Text(t) => locale
                .normalize_number(t)
                .parse::<f64>()
                .map_err(|_| unconvertible::<Self>(value)),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            _ => Err(unconvertible::<Self>(value)),
        }
    }
}

impl FromValue for bool {
    const TARGET: &'static str = "boolean";

    fn from_value(value: &Value, _locale: &Locale) -> Result<Self> {
        match value {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Integer(i) => Ok(*i != 0),
            Value::Real(r) => Ok(*r != 0.0),
            Value::Text(t) => match t.trim().to_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(unconvertible::<Self>(value)),
            },
            _ => Err(unconvertible::<Self>(value)),
        }
    }
}

impl FromValue for String {
    const TARGET: &'static str = "text";

    fn from_value(value: &Value, locale: &Locale) -> Result<Self> {
        match value {
            Value::Null => Ok(String::new()),
            Value::Text(t) => Ok(t.clone()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Real(r) => Ok(r.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Timestamp(ts) => Ok(locale.format_timestamp(ts)),
            Value::Blob(b) => {
                String::from_utf8(b.clone()).map_err(|_| unconvertible::<Self>(value))
            }
        }
    }
}

impl FromValue for Vec<u8> {
    const TARGET: &'static str = "blob";

    fn from_value(value: &Value, _locale: &Locale) -> Result<Self> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Blob(b) => Ok(b.clone()),
            Value::Text(t) => Ok(t.as_bytes().to_vec()),
            _ => Err(unconvertible::<Self>(value)),
        }
    }
}

impl FromValue for NaiveDateTime {
    const TARGET: &'static str = "timestamp";

    fn from_value(value: &Value, locale: &Locale) -> Result<Self> {
        match value {
            Value::Null => Ok(NaiveDateTime::default()),
            Value::Timestamp(ts) => Ok(*ts),
            Value::Text(t) => locale
                .parse_timestamp(t)
                .ok_or_else(|| unconvertible::<Self>(value)),
            _ => Err(unconvertible::<Self>(value)),
        }
    }
}

impl FromValue for NaiveDate {
    const TARGET: &'static str = "date";

    fn from_value(value: &Value, locale: &Locale) -> Result<Self> {
        match value {
            Value::Null => Ok(NaiveDate::default()),
            Value::Timestamp(ts) => Ok(ts.date()),
            Value::Text(t) => locale
                .parse_date(t)
                .ok_or_else(|| unconvertible::<Self>(value)),
            _ => Err(unconvertible::<Self>(value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn from_value(value: &Value, locale: &Locale) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other, locale).map(Some),
        }
    }
}
