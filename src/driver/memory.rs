/// Memory Driver Module
///
/// This module provides the generic connector backend: an in-memory driver
/// serving registered tables and canned per-query results. It exists for
/// fixtures and for bridging non-SQL sources, and it records open/close
/// counts so connection lifecycle discipline is observable in tests.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::command::{Command, CommandKind};
use crate::core::{Result, RowcastError};
use crate::driver::{BufferedCursor, Connection, Cursor, Driver, Value};
use crate::table::{DataSet, Table};
use crate::window::{fill_from_cursor, Window};

#[derive(Clone)]
enum QueryOutcome {
    Rows(Table),
    Affected(u64),
    Fail(String),
}

#[derive(Default)]
struct MemoryStore {
    tables: HashMap<String, Table>,
    queries: HashMap<String, QueryOutcome>,
    opens: usize,
    closes: usize,
}

/// An in-memory connector driver.
///
/// All connections created by one driver instance share its store, so a
/// test can seed tables and canned results up front and inspect lifecycle
/// counters afterwards.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        MemoryDriver::default()
    }

    /// Builder form of `insert_table`.
    pub fn with_table(self, table: Table) -> Self {
        self.insert_table(table);
        self
    }

    /// Registers a table served for `CommandKind::TableDirect` reads.
    pub fn insert_table(&self, table: Table) {
        if let Ok(mut store) = self.store.lock() {
            store.tables.insert(table.name.to_lowercase(), table);
        }
    }

    /// Registers a canned row result for an exact command text.
    pub fn on_query(&self, text: &str, table: Table) {
        if let Ok(mut store) = self.store.lock() {
            store
                .queries
                .insert(text.to_string(), QueryOutcome::Rows(table));
        }
    }

    /// Registers a canned affected-row count for an exact command text.
    pub fn on_update(&self, text: &str, affected: u64) {
        if let Ok(mut store) = self.store.lock() {
            store
                .queries
                .insert(text.to_string(), QueryOutcome::Affected(affected));
        }
    }

    /// Registers a failure for an exact command text.
    pub fn fail_with(&self, text: &str, message: &str) {
        if let Ok(mut store) = self.store.lock() {
            store
                .queries
                .insert(text.to_string(), QueryOutcome::Fail(message.to_string()));
        }
    }

    /// Number of times any connection of this driver was opened.
    pub fn opens(&self) -> usize {
        self.store.lock().map(|s| s.opens).unwrap_or(0)
    }

    /// Number of times any connection of this driver was closed.
    pub fn closes(&self) -> usize {
        self.store.lock().map(|s| s.closes).unwrap_or(0)
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn connect(&self, connection_string: &str) -> Result<Box<dyn Connection>> {
        debug!("Creating memory connection for '{}'", connection_string);
        Ok(Box::new(MemoryConnection {
            store: Arc::clone(&self.store),
            open: false,
            in_transaction: false,
        }))
    }
}

struct MemoryConnection {
    store: Arc<Mutex<MemoryStore>>,
    open: bool,
    in_transaction: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(RowcastError::Driver("Connection is not open".to_string()))
        }
    }

    fn resolve(&self, command: &Command) -> Result<QueryOutcome> {
        self.ensure_open()?;
        let store = self
            .store
            .lock()
            .map_err(|_| RowcastError::Driver("Connector store is poisoned".to_string()))?;
        match command.kind() {
            CommandKind::TableDirect => store
                .tables
                .get(&command.text().to_lowercase())
                .cloned()
                .map(QueryOutcome::Rows)
                .ok_or_else(|| {
                    RowcastError::Driver(format!("No such table '{}'", command.text()))
                }),
            CommandKind::Text | CommandKind::StoredProcedure => store
                .queries
                .get(command.text())
                .cloned()
                .ok_or_else(|| {
                    RowcastError::Driver(format!(
                        "No result registered for command '{}'",
                        command.text()
                    ))
                }),
        }
    }

    fn query_table(&self, command: &Command) -> Result<Table> {
        match self.resolve(command)? {
            QueryOutcome::Rows(table) => Ok(table),
            QueryOutcome::Affected(_) => Err(RowcastError::Driver(format!(
                "Command '{}' does not return rows",
                command.text()
            ))),
            QueryOutcome::Fail(message) => Err(RowcastError::Driver(message)),
        }
    }
}

impl Connection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<()> {
        if !self.open {
            self.open = true;
            if let Ok(mut store) = self.store.lock() {
                store.opens += 1;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.in_transaction = false;
            if let Ok(mut store) = self.store.lock() {
                store.closes += 1;
            }
        }
        Ok(())
    }

    fn execute_update(&mut self, command: &Command) -> Result<u64> {
        match self.resolve(command)? {
            QueryOutcome::Affected(count) => Ok(count),
            QueryOutcome::Rows(_) => Ok(0),
            QueryOutcome::Fail(message) => Err(RowcastError::Driver(message)),
        }
    }

    fn execute_scalar(&mut self, command: &Command) -> Result<Value> {
        let table = self.query_table(command)?;
        Ok(table.value(0, 0).cloned().unwrap_or(Value::Null))
    }

    fn execute_query(&mut self, command: &Command) -> Result<Box<dyn Cursor>> {
        let (columns, rows) = self.query_table(command)?.into_parts();
        Ok(Box::new(BufferedCursor::new(columns, rows)))
    }

    fn fill_table(&mut self, command: &Command, window: Window) -> Result<Table> {
        let (columns, rows) = self.query_table(command)?.into_parts();
        let mut table = Table::new(String::new(), columns.clone());
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

    fn fill_set(&mut self, command: &Command, window: Window) -> Result<DataSet> {
        let mut table = self.fill_table(command, window)?;
        table.name = Uuid::new_v4().to_string();
        let mut set = DataSet::new();
        set.push_table(table);
        Ok(set)
    }

    fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.in_transaction {
            return Err(RowcastError::Driver(
                "Transaction already in progress".to_string(),
            ));
        }
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(RowcastError::Driver(
                "No transaction in progress".to_string(),
            ));
        }
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(RowcastError::Driver(
                "No transaction in progress".to_string(),
            ));
        }
        self.in_transaction = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_table() -> Table {
        let mut table = Table::new("users", vec!["id", "name"]);
        table.push_row(vec![Value::Integer(1), Value::Text("a".to_string())]);
        table.push_row(vec![Value::Integer(2), Value::Text("b".to_string())]);
        table
    }

    #[test]
    fn test_table_direct_serves_registered_table() {
        let driver = MemoryDriver::new().with_table(users_table());
        let mut conn = driver.connect("fixtures").unwrap();
        conn.open().unwrap();

        let command = Command::new("USERS", CommandKind::TableDirect);
        let mut cursor = conn.execute_query(&command).unwrap();
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.value(0).unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_canned_query_and_update() {
        let driver = MemoryDriver::new();
        driver.on_query("SELECT * FROM users", users_table());
        driver.on_update("DELETE FROM users", 2);

        let mut conn = driver.connect("fixtures").unwrap();
        conn.open().unwrap();

        let query = Command::new("SELECT * FROM users", CommandKind::Text);
        assert_eq!(conn.execute_scalar(&query).unwrap(), Value::Integer(1));

        let update = Command::new("DELETE FROM users", CommandKind::Text);
        assert_eq!(conn.execute_update(&update).unwrap(), 2);
    }

    #[test]
    fn test_failure_injection() {
        let driver = MemoryDriver::new();
        driver.fail_with("SELECT boom", "simulated outage");

        let mut conn = driver.connect("fixtures").unwrap();
        conn.open().unwrap();

        let command = Command::new("SELECT boom", CommandKind::Text);
        match conn.execute_query(&command) {
            Err(RowcastError::Driver(msg)) => assert_eq!(msg, "simulated outage"),
            other => panic!("Expected Driver error, got {:?}", other),
        }
    }

    #[test]
    fn test_unregistered_command_is_an_error() {
        let driver = MemoryDriver::new();
        let mut conn = driver.connect("fixtures").unwrap();
        conn.open().unwrap();

        let command = Command::new("SELECT nothing", CommandKind::Text);
        assert!(conn.execute_query(&command).is_err());
    }

    #[test]
    fn test_open_close_counters() {
        let driver = MemoryDriver::new();
        let mut conn = driver.connect("fixtures").unwrap();
        conn.open().unwrap();
        conn.open().unwrap(); // idempotent
        conn.close().unwrap();
        conn.close().unwrap(); // idempotent
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn test_fill_table_applies_window() {
        let driver = MemoryDriver::new().with_table(users_table());
        let mut conn = driver.connect("fixtures").unwrap();
        conn.open().unwrap();

        let command = Command::new("users", CommandKind::TableDirect);
        let table = conn.fill_table(&command, Window::new(1, 1)).unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.value(0, 0), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_transaction_state_management() {
        let driver = MemoryDriver::new();
        let mut conn = driver.connect("fixtures").unwrap();
        conn.open().unwrap();

        conn.begin().unwrap();
        assert!(conn.begin().is_err());
        conn.commit().unwrap();
        assert!(conn.commit().is_err());

        conn.begin().unwrap();
        conn.rollback().unwrap();
        assert!(conn.rollback().is_err());
    }
}
