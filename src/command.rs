/// Command Module
///
/// This module provides the provider-neutral command descriptor: query text,
/// command kind, and named parameters with optional declared-type and size
/// hints. Drivers turn the descriptor into their native command form at
/// execution time.
use crate::convert::{self, Locale};
use crate::core::Result;
use crate::driver::Value;

/// How a command's text is interpreted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Plain query text
    Text,
    /// The text names a stored procedure
    StoredProcedure,
    /// The text names a table to read in full
    TableDirect,
}

/// A declared parameter type hint.
///
/// When present, the parameter value is coerced to this kind before binding.
/// Coercion uses the invariant locale, the way providers convert declared
/// parameter types independently of the caller's display culture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Timestamp,
}

impl DataKind {
    fn coerce(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let locale = Locale::default();
        Ok(match self {
            DataKind::Integer => Value::Integer(convert::convert(value, &locale)?),
            DataKind::Real => Value::Real(convert::convert(value, &locale)?),
            DataKind::Text => Value::Text(convert::convert(value, &locale)?),
            DataKind::Blob => Value::Blob(convert::convert(value, &locale)?),
            DataKind::Boolean => Value::Bool(convert::convert(value, &locale)?),
            DataKind::Timestamp => Value::Timestamp(convert::convert(value, &locale)?),
        })
    }
}

/// A named command parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub data_kind: Option<DataKind>,
    /// Size hint; applied only when greater than zero.
    pub size: usize,
}

impl Parameter {
    /// Produces the value a driver should bind: the raw value, coerced to
    /// the declared kind when one is present, with text truncated to the
    /// size hint when one is set.
    pub fn bind_value(&self) -> Result<Value> {
        let mut value = match self.data_kind {
            Some(kind) => kind.coerce(&self.value)?,
            None => self.value.clone(),
        };
        if self.size > 0 {
            if let Value::Text(text) = &value {
                if text.chars().count() > self.size {
                    value = Value::Text(text.chars().take(self.size).collect());
                }
            }
        }
        Ok(value)
    }
}

/// A provider-neutral command descriptor, immutable in kind once built and
/// owned by the caller until passed to execution.
#[derive(Debug, Clone)]
pub struct Command {
    text: String,
    kind: CommandKind,
    parameters: Vec<Parameter>,
}

impl Command {
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Command {
            text: text.into(),
            kind,
            parameters: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces the command text. The facade uses this to blank the text
    /// after a bulk fill so a recycled command cannot be re-executed by
    /// accident.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Adds a named parameter and returns its position.
    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) -> usize {
        self.parameters.push(Parameter {
            name: name.into(),
            value: value.into(),
            data_kind: None,
            size: 0,
        });
        self.parameters.len() - 1
    }

    /// Adds a named parameter with a declared type and size hint and
    /// returns its position. The size hint is applied only when greater
    /// than zero.
    pub fn add_parameter_typed(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
        data_kind: DataKind,
        size: usize,
    ) -> usize {
        self.parameters.push(Parameter {
            name: name.into(),
            value: value.into(),
            data_kind: Some(data_kind),
            size,
        });
        self.parameters.len() - 1
    }

    /// Removes all bound parameters.
    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }
}
