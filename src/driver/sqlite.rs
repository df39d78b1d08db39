/// SQLite Driver Module
///
/// This module provides the server-SQL backend on rusqlite: lazy open with
/// pragma initialization, named parameter binding, buffered forward-only
/// cursors, and native bulk fills with statement batching for multi-table
/// result sets.
use rusqlite::types::ValueRef;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::debug;
use uuid::Uuid;

use crate::command::{Command, CommandKind};
use crate::core::{Result, RowcastError};
use crate::driver::{BufferedCursor, Connection, Cursor, Driver, Value};
use crate::table::{DataSet, Table};
use crate::window::{fill_from_cursor, Window};

/// The bundled server-SQL backend.
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(&self, connection_string: &str) -> Result<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection {
            path: connection_string.to_string(),
            handle: None,
        }))
    }
}

/// A lazily-opened SQLite connection bound to a database path
/// (`:memory:` for an in-memory database).
pub struct SqliteConnection {
    path: String,
    handle: Option<rusqlite::Connection>,
}

impl SqliteConnection {
    fn handle(&self) -> Result<&rusqlite::Connection> {
        self.handle
            .as_ref()
            .ok_or_else(|| RowcastError::Driver("Connection is not open".to_string()))
    }

    /// Runs a row-returning statement and buffers the full result.
    fn run_query(
        &self,
        sql: &str,
        command: &Command,
        lenient_binding: bool,
    ) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
        let conn = self.handle()?;
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = stmt.column_count();

        bind_parameters(&mut stmt, command, lenient_binding)?;

        let mut buffered = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                cells.push(cell_value(row.get_ref(i)?));
            }
            buffered.push(cells);
        }

        Ok((columns, buffered))
    }

    /// Windows a statement's rows into a buffered table.
    fn fill_one(
        &self,
        sql: &str,
        command: &Command,
        window: Window,
        name: String,
        lenient_binding: bool,
    ) -> Result<Table> {
        let (columns, rows) = self.run_query(sql, command, lenient_binding)?;
        let mut table = Table::new(name, columns.clone());
        let mut cursor = BufferedCursor::new(columns, rows);
        fill_from_cursor(&mut cursor, window, |row| {
            let mut cells = Vec::with_capacity(table.column_count());
            for i in 0..table.column_count() {
                cells.push(row.value(i)?);
            }
            table.push_row(cells);
            Ok(())
        })?;
        Ok(table)
    }
}

impl Connection for SqliteConnection {
    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        debug!("Opening sqlite database at {}", self.path);
        let conn = rusqlite::Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.handle = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.handle.take() {
            debug!("Closing sqlite database at {}", self.path);
            conn.close().map_err(|(_, e)| RowcastError::Database(e))?;
        }
        Ok(())
    }

    fn execute_update(&mut self, command: &Command) -> Result<u64> {
        let sql = effective_text(command)?;
        let conn = self.handle()?;
        let mut stmt = conn.prepare(&sql)?;
        bind_parameters(&mut stmt, command, false)?;
        let changed = stmt.raw_execute()?;
        Ok(changed as u64)
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Value> {
        let sql = effective_text(command)?;
        let conn = self.handle()?;
        let mut stmt = conn.prepare(&sql)?;
        bind_parameters(&mut stmt, command, false)?;
        let mut rows = stmt.raw_query();
        match rows.next()? {
            Some(row) => Ok(cell_value(row.get_ref(0)?)),
            None => Ok(Value::Null),
        }
    }

    fn execute_query(&mut self, command: &Command) -> Result<Box<dyn Cursor>> {
        let sql = effective_text(command)?;
        let (columns, rows) = self.run_query(&sql, command, false)?;
        Ok(Box::new(BufferedCursor::new(columns, rows)))
    }

    fn fill_table(&mut self, command: &Command, window: Window) -> Result<Table> {
        let sql = effective_text(command)?;
        self.fill_one(&sql, command, window, String::new(), false)
    }

    fn fill_set(&mut self, command: &Command, window: Window) -> Result<DataSet> {
        let sql = effective_text(command)?;
        let mut set = DataSet::new();
        let mut first_table = true;
        for statement in split_statements(&sql) {
            let conn = self.handle()?;
            let row_returning = conn.prepare(&statement)?.column_count() > 0;
            if row_returning {
                // the requested window applies to the first table only
                let table_window = if first_table { window } else { Window::ALL };
                first_table = false;
                let table = self.fill_one(
                    &statement,
                    command,
                    table_window,
                    Uuid::new_v4().to_string(),
                    true,
                )?;
                set.push_table(table);
            } else {
                let mut stmt = conn.prepare(&statement)?;
                bind_parameters(&mut stmt, command, true)?;
                stmt.raw_execute()?;
            }
        }
        Ok(set)
    }

    fn begin(&mut self) -> Result<()> {
        self.handle()?.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.handle()?.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.handle()?.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// Resolves the SQL a command kind executes as.
fn effective_text(command: &Command) -> Result<String> {
    match command.kind() {
        CommandKind::Text => Ok(command.text().to_string()),
        CommandKind::TableDirect => Ok(format!(
            "SELECT * FROM \"{}\"",
            command.text().replace('"', "\"\"")
        )),
        CommandKind::StoredProcedure => Err(RowcastError::Driver(
            "SQLite does not support stored procedures".to_string(),
        )),
    }
}

/// Binds a command's named parameters to a prepared statement.
///
/// Descriptor names may be written with or without the `:`/`@`/`$` prefix;
/// whichever spelling the statement uses is resolved. In lenient mode a
/// parameter without a matching placeholder is skipped (multi-statement
/// batches bind only the parameters each statement references); otherwise
/// it is an error.
fn bind_parameters(
    stmt: &mut rusqlite::Statement<'_>,
    command: &Command,
    lenient: bool,
) -> Result<()> {
    for parameter in command.parameters() {
        let ordinal = parameter_ordinal(stmt, &parameter.name)?;
        match ordinal {
            Some(i) => stmt.raw_bind_parameter(i, native_value(parameter.bind_value()?))?,
            None if lenient => continue,
            None => {
                return Err(RowcastError::Driver(format!(
                    "Unknown parameter '{}'",
                    parameter.name
                )))
            }
        }
    }
    Ok(())
}

fn parameter_ordinal(stmt: &rusqlite::Statement<'_>, name: &str) -> Result<Option<usize>> {
    if name.starts_with(&[':', '@', '$'][..]) {
        return Ok(stmt.parameter_index(name)?);
    }
    for prefix in [':', '@', '$'] {
        if let Some(i) = stmt.parameter_index(&format!("{}{}", prefix, name))? {
            return Ok(Some(i));
        }
    }
    Ok(stmt.parameter_index(name)?)
}

/// Maps a provider-neutral value onto SQLite's native storage classes.
fn native_value(value: Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(i) => rusqlite::types::Value::Integer(i),
        Value::Real(r) => rusqlite::types::Value::Real(r),
        Value::Text(t) => rusqlite::types::Value::Text(t),
        Value::Blob(b) => rusqlite::types::Value::Blob(b),
        Value::Bool(b) => rusqlite::types::Value::Integer(b as i64),
        Value::Timestamp(ts) => {
            rusqlite::types::Value::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string())
        }
    }
}

fn cell_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// Splits a batch of SQL statements for a multi-table fill. Falls back to
/// treating the whole text as one statement when it cannot be parsed.
fn split_statements(sql: &str) -> Vec<String> {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) if !statements.is_empty() => {
            statements.iter().map(|s| s.to_string()).collect()
        }
        _ => vec![sql.to_string()],
    }
}
