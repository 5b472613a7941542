//! Streaming query results.
use crate::{
    common::ByteStr,
    error::{Error, Result, ServerException},
    pool::Checkout,
    session::TurnResult,
    value::Decode,
};

/// A materialized result set from one query turn.
///
/// Not restartable: once drained or [`close`][Rows::close]d it releases its
/// underlying session back to the pool. Values are decoded from
/// `ServerData`'s comma-joined text blocks on construction, so `next`/
/// `scan` never touch the wire.
pub struct Rows {
    checkout: Option<Checkout>,
    columns: Vec<ByteStr>,
    rows: Vec<Vec<ByteStr>>,
    cursor: usize,
    exception: Option<ServerException>,
    closed: bool,
}

impl Rows {
    pub(crate) fn new(checkout: Checkout, result: TurnResult) -> Self {
        let column_count = result.columns.len();
        let columns = result.columns.iter().map(|(name, _)| name.clone()).collect();

        let mut rows: Vec<Vec<ByteStr>> = Vec::new();
        for block in &result.blocks {
            // `column_values[i]` is column `i`'s comma-joined text across
            // every row in this block.
            let mut split: Vec<std::str::Split<'_, char>> =
                block.iter().map(|column| column.split(',')).collect();
            if split.len() < column_count {
                split.resize_with(column_count, || "".split(','));
            }
            loop {
                let mut row = Vec::with_capacity(column_count);
                let mut any = false;
                for splitter in split.iter_mut().take(column_count) {
                    match splitter.next() {
                        Some(value) => {
                            any = true;
                            row.push(ByteStr::copy_from_str(value));
                        }
                        None => break,
                    }
                }
                if !any || row.len() < column_count {
                    break;
                }
                rows.push(row);
            }
        }

        Self { checkout: Some(checkout), columns, rows, cursor: 0, exception: result.exception, closed: false }
    }

    /// Column names, in wire order.
    pub fn columns(&self) -> &[ByteStr] {
        &self.columns
    }

    /// Advances the cursor to the next buffered row.
    ///
    /// Returns `false` once every row has been consumed; callers should then
    /// check [`err`][Rows::err] for a deferred server exception.
    pub fn next(&mut self) -> bool {
        if self.closed || self.cursor >= self.rows.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    fn current_row(&self) -> Result<&[ByteStr]> {
        if self.cursor == 0 {
            return Err(Error::usage("scan called before next() returned true"));
        }
        self.rows
            .get(self.cursor - 1)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::usage("scan called before next() returned true"))
    }

    /// Converts the current row's textual values into typed destinations.
    pub fn scan<'a, D: ScanRow<'a>>(&'a self, dest: D) -> Result<()> {
        dest.scan_row(self.current_row()?)
    }

    /// Decodes the current row into `T` by column name, for types deriving
    /// [`crate::FromRow`].
    pub fn decode<T: crate::FromRow>(&self) -> Result<T> {
        let values = self.current_row()?;
        T::from_row(&crate::RowView::new(&self.columns, values))
    }

    /// Any deferred server exception observed while draining this turn.
    pub fn err(&self) -> Option<&ServerException> {
        self.exception.as_ref()
    }

    /// Idempotently releases the underlying session back to the pool.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.checkout.take();
    }
}

impl Drop for Rows {
    fn drop(&mut self) {
        self.close();
    }
}

/// A tuple of `&mut T` destinations [`Rows::scan`] can fill from one row.
pub trait ScanRow<'a> {
    fn scan_row(self, values: &[ByteStr]) -> Result<()>;
}

macro_rules! scan_row_tuple {
    ($($ty:ident $idx:tt),+) => {
        impl<'a, $($ty: Decode),+> ScanRow<'a> for ($(&'a mut $ty,)+) {
            fn scan_row(self, values: &[ByteStr]) -> Result<()> {
                $(
                    let value = values.get($idx).ok_or_else(|| {
                        Error::usage(format!("scan: row has no column at index {}", $idx))
                    })?;
                    *self.$idx = $ty::decode(value).map_err(Error::Decode)?;
                )+
                Ok(())
            }
        }
    };
}

scan_row_tuple!(T0 0);
scan_row_tuple!(T0 0, T1 1);
scan_row_tuple!(T0 0, T1 1, T2 2);
scan_row_tuple!(T0 0, T1 1, T2 2, T3 3);
scan_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4);
scan_row_tuple!(T0 0, T1 1, T2 2, T3 3, T4 4, T5 5);

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::ByteStr;

    fn result_with(columns: &[&str], blocks: Vec<Vec<&str>>) -> TurnResult {
        TurnResult {
            columns: columns.iter().map(|c| (ByteStr::copy_from_str(c), ByteStr::from_static("String"))).collect(),
            blocks: blocks.into_iter().map(|b| b.into_iter().map(ByteStr::copy_from_str).collect()).collect(),
            exception: None,
        }
    }

    #[test]
    fn splits_comma_joined_blocks_into_rows() {
        let result = result_with(&["id", "name"], vec![vec!["1,2,3", "a,b,c"]]);
        // Rows::new needs a real Checkout; exercised indirectly via
        // session/pool integration tests. Here we only validate the parsing
        // helper logic through a bare struct construction path.
        let column_count = result.columns.len();
        let mut split: Vec<std::str::Split<'_, char>> = result.blocks[0].iter().map(|c| c.split(',')).collect();
        let mut rows = Vec::new();
        loop {
            let mut row = Vec::with_capacity(column_count);
            let mut any = false;
            for splitter in split.iter_mut() {
                match splitter.next() {
                    Some(v) => {
                        any = true;
                        row.push(v.to_string());
                    }
                    None => break,
                }
            }
            if !any || row.len() < column_count {
                break;
            }
            rows.push(row);
        }
        assert_eq!(rows, vec![vec!["1".to_string(), "a".to_string()], vec!["2".to_string(), "b".to_string()], vec!["3".to_string(), "c".to_string()]]);
    }
}
