/// Windowing Module
///
/// This module applies a row-offset/row-limit window directly against a
/// forward-only cursor: skip rows are consumed and discarded, then the
/// per-row action runs for exactly the rows in the window, synchronously
/// and in cursor order. No engine-side paging is involved.
use crate::core::{Result, RowcastError};
use crate::driver::Cursor;

/// The (offset, limit) pair restricting which cursor rows are materialized.
///
/// A limit of zero (or below) means "unbounded": every row from the offset
/// to the end of the cursor is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: i64,
    pub limit: i64,
}

impl Window {
    /// The whole result: no offset, no limit.
    pub const ALL: Window = Window {
        offset: 0,
        limit: 0,
    };

    pub fn new(offset: i64, limit: i64) -> Self {
        Window { offset, limit }
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::ALL
    }
}

/// Advances the cursor through the requested window, invoking `action` once
/// per delivered row with the cursor positioned on that row.
///
/// # Arguments
///
/// * `cursor` - The cursor to consume
/// * `window` - Offset and limit to apply
/// * `action` - Per-row action; sees one row at a time, in cursor order
///
/// # Errors
///
/// Returns `RowcastError::InvalidArgument` for a negative offset before any
/// cursor interaction. Cursor exhaustion while skipping is not an error: it
/// is a valid "nothing in range" outcome and zero rows are delivered.
pub fn fill_from_cursor<F>(cursor: &mut dyn Cursor, window: Window, mut action: F) -> Result<()>
where
    F: FnMut(&dyn Cursor) -> Result<()>,
{
    if window.offset < 0 {
        return Err(RowcastError::InvalidArgument(
            "offset must be zero or higher".to_string(),
        ));
    }

    let mut to_skip = window.offset;
    while to_skip > 0 {
        if !cursor.advance()? {
            return Ok(());
        }
        to_skip -= 1;
    }

    if window.limit > 0 {
        let mut delivered = 0;
        while delivered < window.limit && cursor.advance()? {
            action(&*cursor)?;
            delivered += 1;
        }
    } else {
        while cursor.advance()? {
            action(&*cursor)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BufferedCursor, Value};

    fn cursor_with_rows(n: i64) -> BufferedCursor {
        let rows = (1..=n).map(|i| vec![Value::Integer(i)]).collect();
        BufferedCursor::new(vec!["id".to_string()], rows)
    }

    fn collect_ids(cursor: &mut dyn Cursor, window: Window) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        fill_from_cursor(cursor, window, |row| {
            if let Value::Integer(i) = row.value(0)? {
                ids.push(i);
            }
            Ok(())
        })?;
        Ok(ids)
    }

    #[test]
    fn test_offset_and_limit_select_the_window() {
        let mut cursor = cursor_with_rows(3);
        let ids = collect_ids(&mut cursor, Window::new(1, 1)).unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_offset_past_end_delivers_nothing() {
        let mut cursor = cursor_with_rows(3);
        let ids = collect_ids(&mut cursor, Window::new(5, 0)).unwrap();
        assert_eq!(ids, Vec::<i64>::new());
    }

    #[test]
    fn test_zero_limit_means_unbounded() {
        let mut cursor = cursor_with_rows(4);
        let ids = collect_ids(&mut cursor, Window::new(1, 0)).unwrap();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_limit_larger_than_remaining_stops_at_exhaustion() {
        let mut cursor = cursor_with_rows(3);
        let ids = collect_ids(&mut cursor, Window::new(2, 10)).unwrap();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn test_offset_equal_to_row_count_delivers_nothing() {
        let mut cursor = cursor_with_rows(3);
        let ids = collect_ids(&mut cursor, Window::new(3, 0)).unwrap();
        assert_eq!(ids, Vec::<i64>::new());
    }

    #[test]
    fn test_negative_offset_is_rejected_before_cursor_interaction() {
        let mut cursor = cursor_with_rows(3);
        let result = collect_ids(&mut cursor, Window::new(-1, 0));
        match result {
            Err(RowcastError::InvalidArgument(msg)) => {
                assert!(msg.contains("zero or higher"));
            }
            other => panic!("Expected InvalidArgument, got {:?}", other),
        }
        // the cursor was not advanced
        let ids = collect_ids(&mut cursor, Window::ALL).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_negative_limit_behaves_as_unbounded() {
        let mut cursor = cursor_with_rows(3);
        let ids = collect_ids(&mut cursor, Window::new(0, -4)).unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_action_error_stops_iteration() {
        let mut cursor = cursor_with_rows(3);
        let mut seen = 0;
        let result = fill_from_cursor(&mut cursor, Window::ALL, |_row| {
            seen += 1;
            if seen == 2 {
                return Err(RowcastError::Driver("boom".to_string()));
            }
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(seen, 2);
    }
}
