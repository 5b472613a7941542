//! Row-wise ingest staging.
use crate::{
    common::ByteStr,
    error::{Error, Result},
    pool::{Deadline, Pool},
    signal::ClientData,
};

/// Parses the leading `INSERT INTO table (cols…)` clause of `query`,
/// ignoring everything after the closing paren. No SQL beyond the leading
/// clause is parsed.
fn parse_insert(query: &str) -> Result<(ByteStr, Vec<ByteStr>)> {
    let trimmed = query.trim_start();
    let rest = trimmed
        .strip_prefix("INSERT INTO")
        .or_else(|| trimmed.strip_prefix("insert into"))
        .ok_or_else(|| Error::usage("batch query must start with INSERT INTO"))?;

    let rest = rest.trim_start();
    let paren = rest.find('(').ok_or_else(|| Error::usage("batch query is missing a column list"))?;
    let table = rest[..paren].trim();
    if table.is_empty() {
        return Err(Error::usage("batch query is missing a table name"));
    }

    let close = rest[paren..].find(')').ok_or_else(|| Error::usage("batch query's column list is unterminated"))?;
    let columns_str = &rest[paren + 1..paren + close];
    let columns: Vec<ByteStr> = columns_str
        .split(',')
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(ByteStr::copy_from_str)
        .collect();
    if columns.is_empty() {
        return Err(Error::usage("batch query declares no columns"));
    }

    Ok((ByteStr::copy_from_str(table), columns))
}

/// A staged row-wise insert.
///
/// Defers all network work until [`send`][Batch::send]; appends before that
/// only validate arity and buffer locally.
pub struct Batch {
    pool: Pool,
    table: ByteStr,
    columns: Vec<ByteStr>,
    rows: Vec<Vec<ByteStr>>,
    sent: bool,
}

impl Batch {
    pub(crate) fn prepare(pool: Pool, query: &str) -> Result<Self> {
        let (table, columns) = parse_insert(query)?;
        Ok(Self { pool, table, columns, rows: Vec::new(), sent: false })
    }

    /// Number of columns this batch's rows must match.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Buffers one row. Errors if already [`send`][Batch::send]'t, or if
    /// `values`'s arity doesn't match the column count.
    pub fn append<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<ByteStr>,
    {
        if self.sent {
            return Err(Error::usage("batch already sent"));
        }
        let row: Vec<ByteStr> = values.into_iter().map(Into::into).collect();
        if row.len() != self.columns.len() {
            return Err(Error::usage(format!(
                "batch row has {} values, expected {} to match column count",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Acquires a session, performs the batch turn, and releases it
    /// Idempotent by the `sent` flag: a second call errors rather than
    /// re-sending.
    pub async fn send(&mut self) -> Result<()> {
        self.send_with_deadline(&Deadline::none()).await
    }

    /// Same as [`send`][Batch::send], but `deadline` governs both the
    /// acquire and the turn's read/write.
    pub async fn send_with_deadline(&mut self, deadline: &Deadline) -> Result<()> {
        if self.sent {
            return Err(Error::usage("batch already sent"));
        }
        self.sent = true;

        let data = ClientData { table_name: self.table.clone(), columns: self.columns.clone(), rows: self.rows.clone() };
        let result = self.pool.batch(deadline, data).await?;
        if let Some(exception) = result.exception {
            return Err(exception.into());
        }
        Ok(())
    }

    /// Sends if not already sent, then releases.
    pub async fn close(mut self) -> Result<()> {
        if !self.sent {
            self.send().await?;
        }
        Ok(())
    }
}
