//! Scripted in-process driver.
//!
//! Replays canned sessions, statements, and result tables through the
//! real [`TdsDriver`]/[`TdsSession`] seam, so the whole client stack
//! can run without a server. Fills bound slots exactly the way the
//! buffer contract describes (character form, width-truncated), logs
//! the calls tests care about, and honors the rule that refused
//! operations put a graded error on the sink.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

use super::{
    DriverError, EventSink, Liveness, Login, OpenError, RawColumn, RowToken, TdsDriver,
    TdsSession, TypeTag,
};

/// One driver call worth asserting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Open { database: String },
    UseDatabase(String),
    SetTimeout(u32),
    Execute(String),
    Bind { ordinal: usize, width: usize },
    Flush,
    Close,
}

/// Shared, append-only record of driver calls.
#[derive(Debug, Clone, Default)]
pub struct OpLog {
    ops: Arc<Mutex<Vec<Op>>>,
}

impl OpLog {
    fn push(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    /// Copy of everything logged so far.
    pub fn snapshot(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone)]
struct ColumnScript {
    name: String,
    tag: TypeTag,
    length: usize,
}

#[derive(Debug, Clone)]
enum RowScript {
    Cells(Vec<Option<Vec<u8>>>),
    Kind(i32),
    BufferFull,
    Fail(DriverError),
}

/// One scripted result table.
#[derive(Debug, Clone, Default)]
pub struct TableScript {
    columns: Vec<ColumnScript>,
    rows: VecDeque<RowScript>,
}

impl TableScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column with its declared byte length.
    pub fn column(mut self, name: &str, tag: TypeTag, length: usize) -> Self {
        self.columns.push(ColumnScript {
            name: name.to_string(),
            tag,
            length,
        });
        self
    }

    /// Add a data row; `None` cells are SQL null.
    pub fn row<T>(mut self, cells: Vec<Option<T>>) -> Self
    where
        T: Into<Vec<u8>>,
    {
        self.rows.push_back(RowScript::Cells(
            cells.into_iter().map(|c| c.map(Into::into)).collect(),
        ));
        self
    }

    /// Deliver a row kind the client does not recognize.
    pub fn row_kind(mut self, kind: i32) -> Self {
        self.rows.push_back(RowScript::Kind(kind));
        self
    }

    /// Report the row buffer as exhausted at this point.
    pub fn buffer_full(mut self) -> Self {
        self.rows.push_back(RowScript::BufferFull);
        self
    }

    /// Fail the fetch at this point.
    pub fn row_fail(mut self, error: DriverError) -> Self {
        self.rows.push_back(RowScript::Fail(error));
        self
    }
}

#[derive(Debug, Clone)]
enum ResultStep {
    Table(TableScript),
    Fail(DriverError),
}

/// Script for one executed statement.
#[derive(Debug, Clone)]
pub struct StatementScript {
    sql: String,
    refuse: Option<DriverError>,
    steps: VecDeque<ResultStep>,
}

impl StatementScript {
    /// A statement the session will accept.
    pub fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            refuse: None,
            steps: VecDeque::new(),
        }
    }

    /// A statement the session will reject at compile time.
    pub fn failing(sql: &str, error: DriverError) -> Self {
        Self {
            sql: sql.to_string(),
            refuse: Some(error),
            steps: VecDeque::new(),
        }
    }

    /// Append one result table.
    pub fn table(mut self, table: TableScript) -> Self {
        self.steps.push_back(ResultStep::Table(table));
        self
    }

    /// Fail when the client next asks for a result set.
    pub fn result_fail(mut self, error: DriverError) -> Self {
        self.steps.push_back(ResultStep::Fail(error));
        self
    }
}

/// Script for one session the driver will mint.
#[derive(Debug, Clone, Default)]
pub struct SessionScript {
    statements: VecDeque<StatementScript>,
    refuse_login: Option<DriverError>,
    refuse_open: Option<DriverError>,
    refuse_database: Option<DriverError>,
}

impl SessionScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the login record for this connect attempt.
    pub fn login_refused(error: DriverError) -> Self {
        Self {
            refuse_login: Some(error),
            ..Self::default()
        }
    }

    /// Refuse the physical open for this connect attempt.
    pub fn open_refused(error: DriverError) -> Self {
        Self {
            refuse_open: Some(error),
            ..Self::default()
        }
    }

    /// Refuse the database switch after a successful open.
    pub fn database_refused(mut self, error: DriverError) -> Self {
        self.refuse_database = Some(error);
        self
    }

    /// Append a statement script; each execute consumes one, in order.
    pub fn statement(mut self, statement: StatementScript) -> Self {
        self.statements.push_back(statement);
        self
    }
}

/// Scripted driver for tests and offline work.
///
/// Each connect consumes the next [`SessionScript`]; running past the
/// script, or submitting SQL the script does not expect, fails the way
/// a real driver would, graded error on the sink included.
pub struct ReplayDriver {
    sessions: VecDeque<SessionScript>,
    log: OpLog,
    alive: Arc<AtomicBool>,
}

impl ReplayDriver {
    pub fn new() -> Self {
        Self {
            sessions: VecDeque::new(),
            log: OpLog::default(),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Append a session script.
    pub fn session(mut self, script: SessionScript) -> Self {
        self.sessions.push_back(script);
        self
    }

    /// Handle on the op log, for assertions.
    pub fn log(&self) -> OpLog {
        self.log.clone()
    }

    /// Shared liveness flag; store `false` to simulate a dead server.
    /// Every session this driver mints answers its probe from this
    /// flag.
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }
}

impl Default for ReplayDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TdsDriver for ReplayDriver {
    fn open_session(
        &mut self,
        login: &Login,
        sink: EventSink,
    ) -> Result<Box<dyn TdsSession>, OpenError> {
        self.log.push(Op::Open {
            database: login.database.clone(),
        });

        let Some(script) = self.sessions.pop_front() else {
            let err = DriverError::new("no session scripted for this connect", 20002, 9);
            sink.error(err.message.clone(), err.code, err.severity);
            return Err(OpenError::Connection(err));
        };

        if let Some(err) = script.refuse_login {
            sink.error(err.message.clone(), err.code, err.severity);
            return Err(OpenError::Login(err));
        }
        if let Some(err) = script.refuse_open {
            sink.error(err.message.clone(), err.code, err.severity);
            return Err(OpenError::Connection(err));
        }

        Ok(Box::new(ReplaySession {
            statements: script.statements,
            refuse_database: script.refuse_database,
            pending: VecDeque::new(),
            table: None,
            log: self.log.clone(),
            sink,
            alive: self.alive.clone(),
        }))
    }
}

struct BoundSlot {
    width: usize,
    data: BytesMut,
    is_null: bool,
}

struct ActiveTable {
    columns: Vec<ColumnScript>,
    rows: VecDeque<RowScript>,
    slots: Vec<BoundSlot>,
}

struct ReplaySession {
    statements: VecDeque<StatementScript>,
    refuse_database: Option<DriverError>,
    pending: VecDeque<ResultStep>,
    table: Option<ActiveTable>,
    log: OpLog,
    sink: EventSink,
    alive: Arc<AtomicBool>,
}

impl ReplaySession {
    fn column(&self, ordinal: usize) -> Option<&ColumnScript> {
        self.table.as_ref()?.columns.get(ordinal.checked_sub(1)?)
    }

    fn refuse(&self, err: DriverError) -> DriverError {
        self.sink.error(err.message.clone(), err.code, err.severity);
        err
    }

    fn fill_row(&mut self, cells: Vec<Option<Vec<u8>>>) -> Result<RowToken, DriverError> {
        let Some(table) = self.table.as_mut() else {
            return Err(DriverError::new("fetch with no result set pending", 20004, 7));
        };
        if cells.len() != table.slots.len() {
            return Err(DriverError::new(
                format!(
                    "scripted row has {} cells for {} columns",
                    cells.len(),
                    table.slots.len()
                ),
                20004,
                7,
            ));
        }
        for (slot, cell) in table.slots.iter_mut().zip(cells) {
            slot.data.clear();
            match cell {
                None => slot.is_null = true,
                Some(bytes) => {
                    slot.is_null = false;
                    // A bound slot never receives more than its width.
                    let take = bytes.len().min(slot.width);
                    slot.data.extend_from_slice(&bytes[..take]);
                }
            }
        }
        Ok(RowToken::Row)
    }
}

impl TdsSession for ReplaySession {
    fn use_database(&mut self, database: &str) -> Result<(), DriverError> {
        self.log.push(Op::UseDatabase(database.to_string()));
        match self.refuse_database.take() {
            Some(err) => Err(self.refuse(err)),
            None => Ok(()),
        }
    }

    fn set_timeout(&mut self, secs: u32) -> Result<(), DriverError> {
        self.log.push(Op::SetTimeout(secs));
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        self.log.push(Op::Execute(sql.to_string()));
        self.pending.clear();
        self.table = None;

        let Some(statement) = self.statements.pop_front() else {
            return Err(self.refuse(DriverError::new(
                format!("no statement scripted for {sql:?}"),
                20018,
                7,
            )));
        };
        if statement.sql != sql {
            return Err(self.refuse(DriverError::new(
                format!("script expected {:?}, got {sql:?}", statement.sql),
                20018,
                7,
            )));
        }
        if let Some(err) = statement.refuse {
            return Err(self.refuse(err));
        }

        self.pending = statement.steps;
        Ok(())
    }

    fn next_result_set(&mut self) -> Result<bool, DriverError> {
        self.table = None;
        match self.pending.pop_front() {
            None => Ok(false),
            Some(ResultStep::Fail(err)) => Err(self.refuse(err)),
            Some(ResultStep::Table(script)) => {
                let slots = script
                    .columns
                    .iter()
                    .map(|_| BoundSlot {
                        width: 0,
                        data: BytesMut::new(),
                        is_null: true,
                    })
                    .collect();
                self.table = Some(ActiveTable {
                    columns: script.columns,
                    rows: script.rows,
                    slots,
                });
                Ok(true)
            }
        }
    }

    fn column_count(&self) -> usize {
        self.table.as_ref().map(|t| t.columns.len()).unwrap_or(0)
    }

    fn column_name(&self, ordinal: usize) -> String {
        self.column(ordinal).map(|c| c.name.clone()).unwrap_or_default()
    }

    fn column_type(&self, ordinal: usize) -> TypeTag {
        self.column(ordinal).map(|c| c.tag).unwrap_or(TypeTag::Void)
    }

    fn column_length(&self, ordinal: usize) -> usize {
        self.column(ordinal).map(|c| c.length).unwrap_or(0)
    }

    fn convert_width(&self, tag: TypeTag) -> usize {
        // Widest character form each type converts into. Image and
        // void have no character conversion at all.
        match tag {
            TypeTag::Bit => 1,
            TypeTag::Int1 => 4,
            TypeTag::Int2 => 6,
            TypeTag::Int4 => 11,
            TypeTag::Int8 | TypeTag::IntN => 20,
            TypeTag::Flt4 | TypeTag::Real => 16,
            TypeTag::Flt8 | TypeTag::Numeric => 24,
            TypeTag::Money4 | TypeTag::Money | TypeTag::MoneyN | TypeTag::Decimal => 24,
            TypeTag::DateTime
            | TypeTag::DateTime4
            | TypeTag::DateTimeN
            | TypeTag::Date
            | TypeTag::Time
            | TypeTag::BigDateTime
            | TypeTag::BigTime
            | TypeTag::MsDate
            | TypeTag::MsTime
            | TypeTag::MsDateTime2
            | TypeTag::MsDateTimeOffset => 32,
            TypeTag::Char
            | TypeTag::VarChar
            | TypeTag::NVarChar
            | TypeTag::Text
            | TypeTag::NText => 256,
            TypeTag::Binary | TypeTag::VarBinary => 256,
            TypeTag::Image | TypeTag::Void => 0,
        }
    }

    fn bind_column(&mut self, ordinal: usize, width: usize) -> Result<(), DriverError> {
        self.log.push(Op::Bind { ordinal, width });
        let count = self.column_count();
        if ordinal == 0 || ordinal > count {
            return Err(self.refuse(DriverError::new(
                format!("bind ordinal {ordinal} out of {count} columns"),
                20004,
                7,
            )));
        }
        if let Some(table) = self.table.as_mut() {
            let slot = &mut table.slots[ordinal - 1];
            slot.width = width;
            slot.data = BytesMut::with_capacity(width);
            slot.is_null = true;
        }
        Ok(())
    }

    fn next_row(&mut self) -> Result<RowToken, DriverError> {
        let next = match self.table.as_mut() {
            Some(table) => table.rows.pop_front(),
            None => {
                return Err(DriverError::new(
                    "fetch with no result set pending",
                    20004,
                    7,
                ));
            }
        };
        match next {
            None => Ok(RowToken::Done),
            Some(RowScript::Kind(kind)) => Ok(RowToken::Other(kind)),
            Some(RowScript::BufferFull) => Ok(RowToken::BufferFull),
            Some(RowScript::Fail(err)) => Err(self.refuse(err)),
            Some(RowScript::Cells(cells)) => self.fill_row(cells),
        }
    }

    fn column_data(&self, ordinal: usize) -> RawColumn<'_> {
        let slot = self
            .table
            .as_ref()
            .and_then(|t| t.slots.get(ordinal.checked_sub(1)?));
        match slot {
            Some(slot) => RawColumn {
                bytes: &slot.data[..],
                is_null: slot.is_null,
            },
            None => RawColumn {
                bytes: &[],
                is_null: true,
            },
        }
    }

    fn flush(&mut self) {
        self.log.push(Op::Flush);
        self.pending.clear();
        self.table = None;
    }

    fn liveness(&self) -> Arc<dyn Liveness> {
        Arc::new(ReplayLiveness {
            alive: self.alive.clone(),
        })
    }

    fn close(self: Box<Self>) {
        self.log.push(Op::Close);
    }
}

struct ReplayLiveness {
    alive: Arc<AtomicBool>,
}

impl Liveness for ReplayLiveness {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
