/// Driver Capability Module
///
/// This module defines the contract between the materialization core and the
/// database backends, organized into focused submodules:
///
/// ## Architecture
///
/// The driver layer is split into three concerns:
/// - **Capability Contract** (this file): the `Driver`, `Connection` and
///   `Cursor` traits, the `Value` cell type, and the provider registry
/// - **Server-SQL Backend** (`sqlite.rs`): the bundled SQLite driver
/// - **Generic Connector Backend** (`memory.rs`): in-memory tables and
///   canned results, also used as the fixture driver in tests
///
/// ## Error Handling
///
/// All driver operations use the standardized `RowcastError` type for
/// consistent error propagation.
pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use once_cell::sync::OnceCell;

use crate::command::Command;
use crate::convert::{FromValue, Locale};
use crate::core::{Result, RowcastError};
use crate::table::{DataSet, Table};
use crate::window::Window;

/// A single opaque cell value as produced by a driver or bound to a command
/// parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Returns the runtime kind of this value, used in conversion
    /// diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Bool(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Formats a cell value for display.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(t) => write!(f, "{}", t),
            Value::Blob(b) => write!(f, "<BLOB: {} bytes>", b.len()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// A forward-only, single-pass sequence of rows returned by command
/// execution.
///
/// The cursor starts positioned before the first row; `advance` moves to the
/// next row and returns `false` once the sequence is exhausted. A row that
/// has been advanced past is unreachable. The cursor must be released with
/// `close` exactly once regardless of success, failure or early return;
/// `close` is idempotent so scoped-release guards can call it
/// unconditionally.
pub trait Cursor: std::fmt::Debug {
    /// Column names of the result, in result order.
    fn columns(&self) -> &[String];

    /// Moves to the next row. Returns `false` when the cursor is exhausted.
    fn advance(&mut self) -> Result<bool>;

    /// Reads a cell of the current row by zero-based column index.
    fn value(&self, index: usize) -> Result<Value>;

    /// Releases the cursor. Reading or advancing afterwards is an error.
    fn close(&mut self) -> Result<()>;
}

/// Typed accessors over a positioned cursor row.
///
/// These are the convenience getters callers use inside a per-row action or
/// a custom row binding: look a cell up by ordinal or by name and run it
/// through the type converter in one step.
pub trait CursorExt {
    fn get_at<T: FromValue>(&self, index: usize, locale: &Locale) -> Result<T>;
    fn get<T: FromValue>(&self, column: &str, locale: &Locale) -> Result<T>;
}

impl<C: Cursor + ?Sized> CursorExt for C {
    fn get_at<T: FromValue>(&self, index: usize, locale: &Locale) -> Result<T> {
        T::from_value(&self.value(index)?, locale)
    }

    fn get<T: FromValue>(&self, column: &str, locale: &Locale) -> Result<T> {
        let index = self
            .columns()
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| RowcastError::Driver(format!("No such column '{}'", column)))?;
        self.get_at(index, locale)
    }
}

/// A single driver connection.
///
/// Connections are created closed (`Driver::connect`) and opened lazily by
/// the client on first use. The connection is not safe for concurrent use;
/// the design assumes at most one in-flight command per connection.
pub trait Connection {
    fn is_open(&self) -> bool;
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;

    /// Executes a command that returns no rows; returns the affected-row
    /// count.
    fn execute_update(&mut self, command: &Command) -> Result<u64>;

    /// Executes a command and returns the first column of the first row, or
    /// `Value::Null` when the result is empty.
    fn execute_scalar(&mut self, command: &Command) -> Result<Value>;

    /// Executes a command and returns a forward-only cursor over the result.
    fn execute_query(&mut self, command: &Command) -> Result<Box<dyn Cursor>>;

    /// Driver-native bulk fill of a single buffered table, honoring the
    /// requested window.
    fn fill_table(&mut self, command: &Command, window: Window) -> Result<Table>;

    /// Driver-native bulk fill of a multi-table result set. The window
    /// applies to the first table; subsequent tables fill completely.
    fn fill_set(&mut self, command: &Command, window: Window) -> Result<DataSet>;

    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// A database backend capability, selected at construction time.
pub trait Driver: Send + Sync {
    /// The provider identifier this driver registers under.
    fn name(&self) -> &'static str;

    /// Creates a closed connection bound to the given connection string.
    fn connect(&self, connection_string: &str) -> Result<Box<dyn Connection>>;
}

/// The built-in provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Embedded server-SQL engine (SQLite via rusqlite)
    Sqlite,
    /// In-memory generic connector (fixtures, canned results)
    Memory,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Sqlite => "sqlite",
            Provider::Memory => "memory",
        }
    }
}

impl FromStr for Provider {
    type Err = RowcastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Provider::Sqlite),
            "memory" => Ok(Provider::Memory),
            other => Err(RowcastError::Config(format!(
                "Unknown provider '{}'",
                other
            ))),
        }
    }
}

/// Global registry of externally supplied drivers
///
/// Bridge-style backends are injected here under a provider name and picked
/// up by `resolve_driver`, which is also how named configuration entries
/// select their backend. It uses OnceCell for lazy initialization to ensure
/// thread-safe singleton behavior.
static DRIVER_REGISTRY: OnceCell<Mutex<HashMap<String, Arc<dyn Driver>>>> = OnceCell::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<dyn Driver>>> {
    DRIVER_REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a custom driver under a provider name.
///
/// A later registration under the same name replaces the earlier one.
pub fn register_driver(name: &str, driver: Arc<dyn Driver>) {
    if let Ok(mut guard) = registry().lock() {
        guard.insert(name.to_lowercase(), driver);
    }
}

/// Returns the driver for a built-in provider.
pub fn driver_for(provider: Provider) -> Arc<dyn Driver> {
    match provider {
        Provider::Sqlite => Arc::new(sqlite::SqliteDriver),
        Provider::Memory => Arc::new(memory::MemoryDriver::new()),
    }
}

/// Resolves a provider identifier to a driver.
///
/// Built-in names win; otherwise the registry of custom drivers is
/// consulted. An unknown name is a configuration error.
///
/// # Errors
///
/// Returns `RowcastError::Config` if no driver is known under `name`.
pub fn resolve_driver(name: &str) -> Result<Arc<dyn Driver>> {
    if let Ok(provider) = Provider::from_str(name) {
        return Ok(driver_for(provider));
    }
    registry()
        .lock()
        .ok()
        .and_then(|guard| guard.get(&name.to_lowercase()).cloned())
        .ok_or_else(|| RowcastError::Config(format!("Unknown provider '{}'", name)))
}

/// The cursor implementation the bundled drivers hand out.
///
/// Rows are materialized by the driver before the cursor is returned; the
/// contract the core programs against stays forward-only and single-pass,
/// so a streaming driver can implement `Cursor` without buffering.
#[derive(Debug)]
pub struct BufferedCursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<Value>>,
    current: Option<Vec<Value>>,
    closed: bool,
}

impl BufferedCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        BufferedCursor {
            columns,
            rows: rows.into_iter(),
            current: None,
            closed: false,
        }
    }

    pub fn empty() -> Self {
        BufferedCursor::new(Vec::new(), Vec::new())
    }
}

impl Cursor for BufferedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn advance(&mut self) -> Result<bool> {
        if self.closed {
            return Err(RowcastError::Driver("Cursor is closed".to_string()));
        }
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn value(&self, index: usize) -> Result<Value> {
        if self.closed {
            return Err(RowcastError::Driver("Cursor is closed".to_string()));
        }
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| RowcastError::Driver("Cursor has no current row".to_string()))?;
        row.get(index).cloned().ok_or_else(|| {
            RowcastError::Driver(format!("Column index {} out of range", index))
        })
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.current = None;
        // Drop any rows that were never reached.
        for _ in self.rows.by_ref() {}
        Ok(())
    }
}
