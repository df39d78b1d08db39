/// Row Mapping Module
///
/// This module converts a fully-positioned cursor row into a constructed
/// target object. Instead of per-row duck-typed lookup, each target shape
/// declares an explicit mapping table of column names to setter functions
/// (`RowBinding`), built once per shape; the table is resolved against a
/// result's column list once per cursor (`RowPlan`) so the per-row work is
/// plain ordinal access.
///
/// Columns present in the cursor but absent from the shape are ignored.
/// Fields present in the shape but absent from the cursor keep their
/// default value; this is contracted behavior, not an error. A conversion
/// failure for a column that exists on both sides surfaces as a mapping
/// error carrying the column name.
use crate::convert::{FromValue, Locale};
use crate::core::{Result, RowcastError};
use crate::driver::{Cursor, Value};

type Setter<T> = Box<dyn Fn(&mut T, &Value, &Locale) -> Result<()> + Send + Sync>;

/// One column-to-field entry of a mapping table.
pub struct FieldBinding<T> {
    column: String,
    apply: Setter<T>,
}

/// The explicit mapping table for a target shape.
pub struct RowBinding<T> {
    fields: Vec<FieldBinding<T>>,
}

impl<T> Default for RowBinding<T> {
    fn default() -> Self {
        RowBinding::new()
    }
}

impl<T> RowBinding<T> {
    pub fn new() -> Self {
        RowBinding { fields: Vec::new() }
    }

    /// Declares a field: the named column is converted to `V` and handed to
    /// the setter. Column matching against the cursor is case-insensitive.
    pub fn field<V, F>(mut self, column: impl Into<String>, assign: F) -> Self
    where
        V: FromValue + 'static,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.fields.push(FieldBinding {
            column: column.into(),
            apply: Box::new(move |target, value, locale| {
                let converted = V::from_value(value, locale)?;
                assign(target, converted);
                Ok(())
            }),
        });
        self
    }

    /// Resolves the mapping table against a result's column list. Done once
    /// per cursor; fields without a matching column stay unresolved and are
    /// skipped for every row.
    pub fn plan(&self, columns: &[String]) -> RowPlan<'_, T> {
        let slots = self
            .fields
            .iter()
            .map(|field| {
                let ordinal = columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(&field.column));
                (ordinal, field)
            })
            .collect();
        RowPlan { slots }
    }
}

/// A mapping table resolved against a concrete column list.
pub struct RowPlan<'b, T> {
    slots: Vec<(Option<usize>, &'b FieldBinding<T>)>,
}

impl<T: Default> RowPlan<'_, T> {
    /// Constructs the target via its default initializer and populates every
    /// resolved field from the cursor's current row.
    ///
    /// # Errors
    ///
    /// Returns `RowcastError::Mapping` carrying the column name when a cell
    /// cannot be converted to the field's declared type.
    pub fn materialize(&self, row: &dyn Cursor, locale: &Locale) -> Result<T> {
        let mut target = T::default();
        for (ordinal, field) in &self.slots {
            if let Some(index) = ordinal {
                let value = row.value(*index)?;
                (field.apply)(&mut target, &value, locale).map_err(|source| {
                    RowcastError::Mapping {
                        column: field.column.clone(),
                        source: Box::new(source),
                    }
                })?;
            }
        }
        Ok(target)
    }
}

/// A target shape that knows its own mapping table.
///
/// The binding is built once per shape and reused for every row of a
/// result.
pub trait FromRow: Default {
    fn binding() -> RowBinding<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BufferedCursor;

    #[derive(Debug, Default, PartialEq)]
    struct User {
        id: i64,
        name: String,
        active: bool,
    }

    impl FromRow for User {
        fn binding() -> RowBinding<Self> {
            RowBinding::new()
                .field("id", |u: &mut User, v: i64| u.id = v)
                .field("name", |u: &mut User, v: String| u.name = v)
                .field("active", |u: &mut User, v: bool| u.active = v)
        }
    }

    fn positioned_cursor(columns: Vec<&str>, row: Vec<Value>) -> BufferedCursor {
        let mut cursor = BufferedCursor::new(
            columns.into_iter().map(String::from).collect(),
            vec![row],
        );
        cursor.advance().unwrap();
        cursor
    }

    #[test]
    fn test_maps_matching_columns() {
        let cursor = positioned_cursor(
            vec!["id", "name", "active"],
            vec![
                Value::Integer(1),
                Value::Text("alice".to_string()),
                Value::Integer(1),
            ],
        );
        let binding = User::binding();
        let plan = binding.plan(cursor.columns());
        let user = plan.materialize(&cursor, &Locale::default()).unwrap();
        assert_eq!(
            user,
            User {
                id: 1,
                name: "alice".to_string(),
                active: true,
            }
        );
    }

    #[test]
    fn test_column_match_is_case_insensitive() {
        let cursor = positioned_cursor(
            vec!["ID", "Name"],
            vec![Value::Integer(7), Value::Text("bob".to_string())],
        );
        let binding = User::binding();
        let plan = binding.plan(cursor.columns());
        let user = plan.materialize(&cursor, &Locale::default()).unwrap();
        assert_eq!(user.id, 7);
        assert_eq!(user.name, "bob");
    }

    #[test]
    fn test_missing_column_leaves_field_at_default() {
        let cursor = positioned_cursor(vec!["id"], vec![Value::Integer(3)]);
        let binding = User::binding();
        let plan = binding.plan(cursor.columns());
        let user = plan.materialize(&cursor, &Locale::default()).unwrap();
        assert_eq!(user.id, 3);
        assert_eq!(user.name, "");
        assert!(!user.active);
    }

    #[test]
    fn test_extra_cursor_columns_are_ignored() {
        let cursor = positioned_cursor(
            vec!["id", "name", "unrelated"],
            vec![
                Value::Integer(2),
                Value::Text("eve".to_string()),
                Value::Blob(vec![0xff]),
            ],
        );
        let binding = User::binding();
        let plan = binding.plan(cursor.columns());
        let user = plan.materialize(&cursor, &Locale::default()).unwrap();
        assert_eq!(user.id, 2);
        assert_eq!(user.name, "eve");
    }

    #[test]
    fn test_conversion_failure_reports_column_name() {
        let cursor = positioned_cursor(
            vec!["id", "name"],
            vec![
                Value::Text("not a number".to_string()),
                Value::Text("carol".to_string()),
            ],
        );
        let binding = User::binding();
        let plan = binding.plan(cursor.columns());
        match plan.materialize(&cursor, &Locale::default()) {
            Err(RowcastError::Mapping { column, source }) => {
                assert_eq!(column, "id");
                assert!(matches!(*source, RowcastError::Conversion { .. }));
            }
            other => panic!("Expected Mapping error, got {:?}", other),
        }
    }
}
