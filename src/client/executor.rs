//! Statement execution and result assembly.
//!
//! Drives one batch through the session: set the query timeout,
//! compile and execute, then walk result sets, bind columns, fetch
//! rows, and decode. Fatal conditions abort the batch; undecodable or
//! unrecognized rows are skipped with a diagnostic. The session is
//! flushed on the way out no matter how the batch ended.

use tracing::{debug, error, warn};

use crate::decode::{ColumnDescriptor, DecodeError, decode_value};
use crate::driver::{EventSink, RowToken, TdsDriver, TdsSession};
use crate::error::{ClientError, ClientResult};
use crate::rows::{ResultSet, Row, Table};

use super::connection::Connection;

impl<D: TdsDriver> Connection<D> {
    /// Run one SQL batch and assemble every result set it returns.
    pub(crate) fn execute(&mut self, sql: &str) -> ClientResult<ResultSet> {
        let timeout = self.config().timeout_secs;
        let sink = self.sink().clone();
        let session = self.session_mut()?;

        let outcome = run_statement(session, sql, timeout, &sink);
        // Leave nothing pending for the next statement, pass or fail.
        session.flush();

        match &outcome {
            Ok(results) => debug!(tables = results.len(), "execute finished"),
            Err(e) => error!(error = %e, "execute failed"),
        }
        outcome
    }
}

fn run_statement(
    session: &mut dyn TdsSession,
    sql: &str,
    timeout: u32,
    sink: &EventSink,
) -> ClientResult<ResultSet> {
    session
        .set_timeout(timeout)
        .map_err(|e| ClientError::Execution(e.to_string()))?;

    debug!(sql, "executing");
    session
        .execute(sql)
        .map_err(|e| ClientError::Execution(e.to_string()))?;

    let mut results = ResultSet::new();
    loop {
        let ready = session
            .next_result_set()
            .map_err(|e| ClientError::ResultSet(e.to_string()))?;
        if !ready {
            break;
        }
        results.push(fetch_table(session, sink)?);
    }
    Ok(results)
}

/// Bind one result set's columns and drain its rows into a table.
fn fetch_table(session: &mut dyn TdsSession, sink: &EventSink) -> ClientResult<Table> {
    let descriptors = bind_columns(session)?;

    let mut table = Table::new();
    loop {
        let token = session
            .next_row()
            .map_err(|e| ClientError::RowFetch(e.to_string()))?;
        match token {
            RowToken::Done => break,
            RowToken::BufferFull => {
                return Err(ClientError::BufferFull("row buffer exhausted".to_string()));
            }
            RowToken::Other(kind) => {
                warn!(kind, "skipping unrecognized row kind");
                sink.message(format!("unknown row kind {kind}, row skipped"));
            }
            RowToken::Row => match decode_row(session, &descriptors) {
                Ok(row) => table.push(row),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable row");
                    sink.message(format!("row skipped: {e}"));
                }
            },
        }
    }
    Ok(table)
}

/// Describe and bind every column of the current result set.
fn bind_columns(session: &mut dyn TdsSession) -> ClientResult<Vec<ColumnDescriptor>> {
    let count = session.column_count();
    let mut descriptors = Vec::with_capacity(count);
    for ordinal in 1..=count {
        let descriptor = ColumnDescriptor::read(session, ordinal);
        if descriptor.width == 0 {
            return Err(ClientError::Resource(format!(
                "column '{}' ({}) has no usable width",
                descriptor.name, descriptor.tag
            )));
        }
        session
            .bind_column(ordinal, descriptor.width)
            .map_err(|e| ClientError::ResultSet(e.to_string()))?;
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

/// Decode the bound buffers of the row just fetched.
fn decode_row(
    session: &dyn TdsSession,
    descriptors: &[ColumnDescriptor],
) -> Result<Row, DecodeError> {
    let mut row = Row::new();
    for descriptor in descriptors {
        let raw = session.column_data(descriptor.ordinal);
        let value = decode_value(descriptor, raw)?;
        row.insert(descriptor.name.clone(), value);
    }
    Ok(row)
}
