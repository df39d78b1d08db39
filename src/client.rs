/// Client Module
///
/// This module provides the provider-agnostic execution facade. A `DbClient`
/// owns one driver connection and materializes command results into the five
/// supported shapes: a scalar, a flat array of scalars, a list of mapped
/// objects, a single mapped object, or a buffered table/multi-table result.
///
/// ## Execution discipline
///
/// Every operation shares one lifecycle:
/// - if the connection is closed it is opened before executing (idempotent)
/// - when the connection was opened by this call, it is closed again once
///   the call's cursor or fill completes, success or failure
/// - the command's parameters are cleared on every exit path
/// - bulk fills additionally blank the command text afterwards
///
/// Cleanup runs through scoped-release guards, so failures propagate to the
/// caller only after the cursor and connection have been released.
use tracing::debug;

use crate::command::{Command, CommandKind};
use crate::config::Config;
use crate::convert::{convert, FromValue, Locale};
use crate::core::{Result, RowcastError};
use crate::driver::{driver_for, resolve_driver, Connection, Cursor, Driver, Provider, Value};
use crate::row::{FromRow, RowBinding};
use crate::table::{DataSet, Table};
use crate::window::{fill_from_cursor, Window};

/// Closes a cursor on every exit path.
struct CursorGuard(Box<dyn Cursor>);

impl CursorGuard {
    fn cursor_mut(&mut self) -> &mut dyn Cursor {
        self.0.as_mut()
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        let _ = self.0.close();
    }
}

/// The provider-agnostic data access facade.
///
/// A client owns a single driver connection; it is not safe for concurrent
/// use and assumes at most one in-flight command at a time. Concurrent
/// callers use separate clients.
pub struct DbClient {
    connection: Box<dyn Connection>,
    connection_string: String,
    locale: Locale,
}

impl std::fmt::Debug for DbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbClient")
            .field("connection_string", &self.connection_string)
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}

impl DbClient {
    /// Creates a client for a built-in provider. The connection is created
    /// closed and opened lazily on first execution.
    pub fn connect(provider: Provider, connection_string: &str) -> Result<Self> {
        Self::connect_with(driver_for(provider).as_ref(), connection_string)
    }

    /// Creates a client over an injected driver capability.
    pub fn connect_with(driver: &dyn Driver, connection_string: &str) -> Result<Self> {
        debug!("Creating {} connection", driver.name());
        let connection = driver.connect(connection_string)?;
        Ok(DbClient {
            connection,
            connection_string: connection_string.to_string(),
            locale: Locale::default(),
        })
    }

    /// Creates a client from a named configuration entry.
    ///
    /// # Errors
    ///
    /// Returns `RowcastError::Config` when the entry does not exist or names
    /// an unknown provider; both are raised before any driver work.
    pub fn from_config(config: &Config, name: &str) -> Result<Self> {
        let entry = config.connection(name)?;
        let driver = resolve_driver(&entry.provider)?;
        let mut client = Self::connect_with(driver.as_ref(), &entry.connection_string)?;
        if let Some(locale) = config.locale() {
            client.locale = locale;
        }
        Ok(client)
    }

    /// Replaces the locale used for conversions.
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn locale(&self) -> &Locale {
        &self.locale
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Opens the connection. Safe to call when already open.
    pub fn open(&mut self) -> Result<()> {
        self.connection.open()
    }

    /// Closes the connection. Safe to call when already closed.
    pub fn close(&mut self) -> Result<()> {
        self.connection.close()
    }

    /// Builds a command descriptor for this facade.
    pub fn create_command(&self, text: &str, kind: CommandKind) -> Command {
        Command::new(text, kind)
    }

    /// Starts a transaction, opening the connection if needed. The returned
    /// scope derefs to the client so commands run inside it; it commits on
    /// `complete` and rolls back when dropped without it.
    pub fn begin_transaction(&mut self) -> Result<TransactionScope<'_>> {
        if !self.connection.is_open() {
            self.connection.open()?;
        }
        self.connection.begin()?;
        Ok(TransactionScope {
            client: self,
            completed: false,
        })
    }

    /// Executes a command that returns no rows; returns the affected-row
    /// count.
    pub fn execute_non_query(&mut self, command: &mut Command) -> Result<u64> {
        self.run_disciplined(command, |conn, cmd, _locale| conn.execute_update(cmd))
    }

    /// Executes a command for a single value: the first column of the first
    /// row, converted to the requested type. An empty result converts the
    /// null sentinel, yielding the target's default value.
    pub fn execute_scalar<T: FromValue>(&mut self, command: &mut Command) -> Result<T> {
        let value = self.run_disciplined(command, |conn, cmd, _locale| conn.execute_scalar(cmd))?;
        convert(&value, &self.locale)
    }

    /// Executes a command and collects column zero of each windowed row,
    /// converted to the requested type, in cursor order.
    pub fn execute_array<T: FromValue>(
        &mut self,
        command: &mut Command,
        window: Window,
    ) -> Result<Vec<T>> {
        self.run_disciplined(command, |conn, cmd, locale| {
            let mut guard = CursorGuard(conn.execute_query(cmd)?);
            let mut items = Vec::new();
            fill_from_cursor(guard.cursor_mut(), window, |row| {
                items.push(convert::<T>(&row.value(0)?, locale)?);
                Ok(())
            })?;
            Ok(items)
        })
    }

    /// Executes a command and maps each windowed row into the target shape,
    /// in cursor order.
    pub fn execute_list<T: FromRow>(
        &mut self,
        command: &mut Command,
        window: Window,
    ) -> Result<Vec<T>> {
        let binding = T::binding();
        self.execute_list_with(command, window, &binding)
    }

    /// `execute_list` with a caller-supplied mapping table.
    pub fn execute_list_with<T: Default>(
        &mut self,
        command: &mut Command,
        window: Window,
        binding: &RowBinding<T>,
    ) -> Result<Vec<T>> {
        self.run_disciplined(command, |conn, cmd, locale| {
            let mut guard = CursorGuard(conn.execute_query(cmd)?);
            let cursor = guard.cursor_mut();
            let plan = binding.plan(cursor.columns());
            let mut items = Vec::new();
            fill_from_cursor(cursor, window, |row| {
                items.push(plan.materialize(row, locale)?);
                Ok(())
            })?;
            Ok(items)
        })
    }

    /// Executes a command and maps the first row into the target shape. A
    /// result with no rows yields the shape's default value; this is the
    /// contracted outcome, not an error.
    pub fn execute_object<T: FromRow>(&mut self, command: &mut Command) -> Result<T> {
        let binding = T::binding();
        self.execute_object_with(command, &binding)
    }

    /// `execute_object` with a caller-supplied mapping table.
    pub fn execute_object_with<T: Default>(
        &mut self,
        command: &mut Command,
        binding: &RowBinding<T>,
    ) -> Result<T> {
        self.run_disciplined(command, |conn, cmd, locale| {
            let mut guard = CursorGuard(conn.execute_query(cmd)?);
            let cursor = guard.cursor_mut();
            if cursor.advance()? {
                let plan = binding.plan(cursor.columns());
                plan.materialize(&*cursor, locale)
            } else {
                Ok(T::default())
            }
        })
    }

    /// Fills a buffered table through the driver's native bulk fill,
    /// honoring the window. The command's text is blanked afterwards so a
    /// recycled command cannot be re-executed by accident.
    pub fn execute_table(&mut self, command: &mut Command, window: Window) -> Result<Table> {
        let result =
            self.run_disciplined(command, |conn, cmd, _locale| conn.fill_table(cmd, window));
        command.set_text("");
        result
    }

    /// Fills a buffered multi-table result set; the window applies to the
    /// first table. The command's text is blanked afterwards.
    pub fn execute_set(&mut self, command: &mut Command, window: Window) -> Result<DataSet> {
        let result =
            self.run_disciplined(command, |conn, cmd, _locale| conn.fill_set(cmd, window));
        command.set_text("");
        result
    }

    /// Executes a command and returns the raw cursor as a `RowStream`.
    ///
    /// Parameters are cleared before the stream is returned. When this call
    /// opened the connection, the stream owns it: dropping (or closing) the
    /// stream releases the cursor and then the connection, so an abandoned
    /// stream cannot leak a connection.
    pub fn execute_cursor(&mut self, command: &mut Command) -> Result<RowStream<'_>> {
        let opened_here = !self.connection.is_open();
        let result = (|| {
            if opened_here {
                self.connection.open()?;
            }
            self.connection.execute_query(command)
        })();
        command.clear_parameters();
        match result {
            Ok(cursor) => Ok(RowStream {
                cursor: Some(cursor),
                connection: if opened_here {
                    Some(&mut self.connection)
                } else {
                    None
                },
            }),
            Err(e) => {
                if opened_here {
                    let _ = self.connection.close();
                }
                Err(e)
            }
        }
    }

    /// The shared execution lifecycle: idempotent open, run, clear
    /// parameters, and release the connection again if this call opened it.
    fn run_disciplined<R>(
        &mut self,
        command: &mut Command,
        op: impl FnOnce(&mut dyn Connection, &Command, &Locale) -> Result<R>,
    ) -> Result<R> {
        let opened_here = !self.connection.is_open();
        debug!("Executing {:?} command", command.kind());
        let result = (|| {
            if opened_here {
                self.connection.open()?;
            }
            op(self.connection.as_mut(), command, &self.locale)
        })();
        command.clear_parameters();
        if opened_here {
            let closed = self.connection.close();
            return result.and_then(|value| closed.map(|_| value));
        }
        result
    }
}

/// A raw forward-only row stream handed out by `execute_cursor`.
///
/// The stream is the cursor's single owner. In cursor-owns-connection mode
/// it also owns the connection it was opened on and releases it with the
/// cursor.
pub struct RowStream<'a> {
    cursor: Option<Box<dyn Cursor>>,
    connection: Option<&'a mut Box<dyn Connection>>,
}

impl std::fmt::Debug for RowStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("cursor", &self.cursor)
            .field("connection_owned", &self.connection.is_some())
            .finish()
    }
}

impl RowStream<'_> {
    /// Releases the cursor and, in cursor-owns-connection mode, the
    /// connection.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        let mut result = Ok(());
        if let Some(mut cursor) = self.cursor.take() {
            result = cursor.close();
        }
        if let Some(connection) = self.connection.take() {
            let closed = connection.close();
            if result.is_ok() {
                result = closed;
            }
        }
        result
    }
}

impl Cursor for RowStream<'_> {
    fn columns(&self) -> &[String] {
        self.cursor.as_ref().map(|c| c.columns()).unwrap_or(&[])
    }

    fn advance(&mut self) -> Result<bool> {
        match self.cursor.as_mut() {
            Some(cursor) => cursor.advance(),
            None => Err(RowcastError::Driver("Cursor is closed".to_string())),
        }
    }

    fn value(&self, index: usize) -> Result<Value> {
        match self.cursor.as_ref() {
            Some(cursor) => cursor.value(index),
            None => Err(RowcastError::Driver("Cursor is closed".to_string())),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.release()
    }
}

impl Drop for RowStream<'_> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// A thin pass-through over the driver's transaction support: commits on
/// `complete`, rolls back when dropped without completing. Derefs to the
/// owning client, so commands execute inside the scope.
pub struct TransactionScope<'a> {
    client: &'a mut DbClient,
    completed: bool,
}

impl TransactionScope<'_> {
    pub fn complete(mut self) -> Result<()> {
        self.completed = true;
        self.client.connection.commit()
    }
}

impl std::ops::Deref for TransactionScope<'_> {
    type Target = DbClient;

    fn deref(&self) -> &DbClient {
        self.client
    }
}

impl std::ops::DerefMut for TransactionScope<'_> {
    fn deref_mut(&mut self) -> &mut DbClient {
        self.client
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let _ = self.client.connection.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;
    use crate::row::RowBinding;

    #[derive(Debug, Default, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    impl FromRow for User {
        fn binding() -> RowBinding<Self> {
            RowBinding::new()
                .field("id", |u: &mut User, v: i64| u.id = v)
                .field("name", |u: &mut User, v: String| u.name = v)
        }
    }

    fn users_table() -> Table {
        let mut table = Table::new("users", vec!["id", "name"]);
        table.push_row(vec![Value::Integer(1), Value::Text("a".to_string())]);
        table.push_row(vec![Value::Integer(2), Value::Text("b".to_string())]);
        table.push_row(vec![Value::Integer(3), Value::Text("c".to_string())]);
        table
    }

    fn fixture() -> (MemoryDriver, DbClient) {
        let driver = MemoryDriver::new().with_table(users_table());
        driver.on_query("SELECT id FROM users", {
            let mut t = Table::new("ids", vec!["id"]);
            t.push_row(vec![Value::Integer(1)]);
            t.push_row(vec![Value::Integer(2)]);
            t.push_row(vec![Value::Integer(3)]);
            t
        });
        driver.on_query("SELECT answer", {
            let mut t = Table::new("answer", vec!["answer"]);
            t.push_row(vec![Value::Text("42".to_string())]);
            t
        });
        driver.on_query("SELECT empty", Table::new("empty", vec!["id", "name"]));
        driver.on_update("DELETE FROM users", 3);
        driver.fail_with("SELECT boom", "simulated outage");
        let client = DbClient::connect_with(&driver, "fixtures").unwrap();
        (driver, client)
    }

    #[test]
    fn test_execute_scalar_converts_value() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("SELECT answer", CommandKind::Text);
        let answer: i64 = client.execute_scalar(&mut command).unwrap();
        assert_eq!(answer, 42);
    }

    #[test]
    fn test_execute_scalar_conversion_failure_surfaces() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("SELECT answer", CommandKind::Text);
        match client.execute_scalar::<bool>(&mut command) {
            Err(RowcastError::Conversion { from, target }) => {
                assert_eq!(from, "text");
                assert_eq!(target, "boolean");
            }
            other => panic!("Expected Conversion error, got {:?}", other),
        }
    }

    #[test]
    fn test_execute_array_in_cursor_order() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("SELECT id FROM users", CommandKind::Text);
        let ids: Vec<i64> = client.execute_array(&mut command, Window::ALL).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_execute_array_applies_window() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("SELECT id FROM users", CommandKind::Text);
        let ids: Vec<i64> = client
            .execute_array(&mut command, Window::new(1, 1))
            .unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_execute_list_maps_rows() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("users", CommandKind::TableDirect);
        let users: Vec<User> = client
            .execute_list(&mut command, Window::new(1, 1))
            .unwrap();
        assert_eq!(
            users,
            vec![User {
                id: 2,
                name: "b".to_string(),
            }]
        );
    }

    #[test]
    fn test_execute_list_with_custom_binding() {
        let (_driver, mut client) = fixture();
        let binding = RowBinding::new().field("name", |u: &mut User, v: String| u.name = v);
        let mut command = Command::new("users", CommandKind::TableDirect);
        let users: Vec<User> = client
            .execute_list_with(&mut command, Window::new(0, 1), &binding)
            .unwrap();
        assert_eq!(users[0].name, "a");
        assert_eq!(users[0].id, 0); // not bound, stays default
    }

    #[test]
    fn test_execute_object_reads_first_row() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("users", CommandKind::TableDirect);
        let user: User = client.execute_object(&mut command).unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(user.name, "a");
    }

    #[test]
    fn test_execute_object_on_empty_result_returns_default() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("SELECT empty", CommandKind::Text);
        let user: User = client.execute_object(&mut command).unwrap();
        assert_eq!(user, User::default());
    }

    #[test]
    fn test_parameters_cleared_after_success() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("SELECT id FROM users", CommandKind::Text);
        command.add_parameter("unused_by_connector", 1i64);
        let _: Vec<i64> = client.execute_array(&mut command, Window::ALL).unwrap();
        assert!(command.parameters().is_empty());
    }

    #[test]
    fn test_parameters_cleared_after_failure() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("SELECT boom", CommandKind::Text);
        command.add_parameter("id", 1i64);
        assert!(client
            .execute_array::<i64>(&mut command, Window::ALL)
            .is_err());
        assert!(command.parameters().is_empty());
    }

    #[test]
    fn test_connection_opened_here_is_closed_again() {
        let (driver, mut client) = fixture();
        assert!(!client.is_open());
        let mut command = Command::new("SELECT id FROM users", CommandKind::Text);
        let _: Vec<i64> = client.execute_array(&mut command, Window::ALL).unwrap();
        assert!(!client.is_open());
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn test_explicitly_opened_connection_stays_open() {
        let (driver, mut client) = fixture();
        client.open().unwrap();
        let mut command = Command::new("SELECT id FROM users", CommandKind::Text);
        let _: Vec<i64> = client.execute_array(&mut command, Window::ALL).unwrap();
        assert!(client.is_open());
        assert_eq!(driver.closes(), 0);
        client.close().unwrap();
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn test_connection_released_after_failure() {
        let (driver, mut client) = fixture();
        let mut command = Command::new("SELECT boom", CommandKind::Text);
        assert!(client
            .execute_array::<i64>(&mut command, Window::ALL)
            .is_err());
        assert!(!client.is_open());
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.closes(), 1);
    }

    #[test]
    fn test_execute_table_blanks_command_text() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("users", CommandKind::TableDirect);
        command.add_parameter("unused", 1i64);
        let table = client.execute_table(&mut command, Window::ALL).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(command.text(), "");
        assert!(command.parameters().is_empty());
    }

    #[test]
    fn test_execute_table_blanks_text_even_on_failure() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("SELECT boom", CommandKind::Text);
        assert!(client.execute_table(&mut command, Window::ALL).is_err());
        assert_eq!(command.text(), "");
        assert!(command.parameters().is_empty());
    }

    #[test]
    fn test_execute_set_names_tables() {
        let (_driver, mut client) = fixture();
        let mut command = Command::new("users", CommandKind::TableDirect);
        let set = client.execute_set(&mut command, Window::new(0, 2)).unwrap();
        assert_eq!(set.tables().len(), 1);
        assert_eq!(set.tables()[0].row_count(), 2);
        assert!(!set.tables()[0].name.is_empty());
    }

    #[test]
    fn test_row_stream_owns_connection_it_opened() {
        let (driver, mut client) = fixture();
        {
            let mut command = Command::new("users", CommandKind::TableDirect);
            let mut stream = client.execute_cursor(&mut command).unwrap();
            assert!(stream.advance().unwrap());
            assert_eq!(stream.value(0).unwrap(), Value::Integer(1));
            // dropped here without explicit close
        }
        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.closes(), 1);
        assert!(!client.is_open());
    }

    #[test]
    fn test_row_stream_leaves_caller_managed_connection_open() {
        let (driver, mut client) = fixture();
        client.open().unwrap();
        {
            let mut command = Command::new("users", CommandKind::TableDirect);
            let stream = client.execute_cursor(&mut command).unwrap();
            stream.close().unwrap();
        }
        assert!(client.is_open());
        assert_eq!(driver.closes(), 0);
    }

    #[test]
    fn test_transaction_scope_commits_on_complete() {
        let (_driver, mut client) = fixture();
        let mut scope = client.begin_transaction().unwrap();
        let mut command = Command::new("DELETE FROM users", CommandKind::Text);
        assert_eq!(scope.execute_non_query(&mut command).unwrap(), 3);
        scope.complete().unwrap();
        // a new transaction can start after the previous one completed
        let scope = client.begin_transaction().unwrap();
        drop(scope); // rolls back
        assert!(client.begin_transaction().is_ok());
    }

    #[test]
    fn test_from_config_rejects_missing_entry() {
        let config: Config = toml::from_str(
            r#"
[connections.main]
provider = "memory"
connection_string = "fixtures"
"#,
        )
        .unwrap();
        assert!(DbClient::from_config(&config, "main").is_ok());
        match DbClient::from_config(&config, "other") {
            Err(RowcastError::Config(msg)) => assert!(msg.contains("other")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }
}
