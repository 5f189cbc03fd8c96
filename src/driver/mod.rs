//! The blocking wire-protocol seam.
//!
//! Everything that actually speaks TDS lives behind the two traits in
//! this module. [`TdsDriver`] mints physical sessions; [`TdsSession`] is
//! one open connection with the primitive operations the client layer
//! drives: switch database, compile and execute a batch, walk result
//! sets, bind column buffers, fetch rows, flush.
//!
//! Split across modules:
//! - `mod.rs` - traits, wire-facing types, the event sink
//! - `replay.rs` - scripted in-process driver for tests and offline use
//!
//! # Bound buffer contract
//!
//! For every type family except binary/varbinary/void, a bound column
//! slot holds the *character form* of the value as converted by the
//! protocol library: integers and floats arrive as ASCII numerals, bit
//! as a single `'0'`/`'1'` character, character data as UTF-8 cut at
//! the first NUL, and image data as hexadecimal digit pairs (two
//! characters per byte). Binary-family slots hold raw untranslated
//! bytes. All methods on [`TdsSession`] block; callers are expected to
//! run them off the async runtime.

mod replay;

pub use replay::{
    Op, OpLog, ReplayDriver, SessionScript, StatementScript, TableScript,
};

use std::sync::Arc;

use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;

/// Everything a driver needs to open one session.
///
/// Owns the only copy of the password; the client drops the record as
/// soon as the connect attempt finishes, on both outcomes.
#[derive(Debug, Clone)]
pub struct Login {
    pub host: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub charset: String,
    pub timeout_secs: u32,
}

/// A graded failure reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
    pub code: i32,
    pub severity: i32,
}

impl DriverError {
    pub fn new(message: impl Into<String>, code: i32, severity: i32) -> Self {
        Self {
            message: message.into(),
            code,
            severity,
        }
    }
}

/// Where a connect attempt fell over.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    /// The login record itself was rejected.
    #[error("{0}")]
    Login(DriverError),

    /// The physical open failed.
    #[error("{0}")]
    Connection(DriverError),
}

/// Point-in-time liveness probe for one session.
///
/// Answers from driver-internal state; the client never caches the
/// result.
pub trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// A notification surfaced outside an operation's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Informational server or client message.
    Message(String),
    /// Graded error, with the driver's code and severity.
    Error {
        text: String,
        code: i32,
        severity: i32,
    },
}

/// Cloneable handle drivers use to surface messages and errors.
///
/// Events land on the client's delivery task and reach the registered
/// observer there. Sends are best-effort: once the delivery side is
/// gone, events are dropped silently.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Build a sink plus its receiving end. Meant for driver tests.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an informational message.
    pub fn message(&self, text: impl Into<String>) {
        let _ = self.tx.send(Event::Message(text.into()));
    }

    /// Report a graded error.
    pub fn error(&self, text: impl Into<String>, code: i32, severity: i32) {
        let _ = self.tx.send(Event::Error {
            text: text.into(),
            code,
            severity,
        });
    }
}

/// Protocol type tag of one column.
///
/// The tag set is closed; decoding dispatches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Bit,
    Int1,
    Int2,
    Int4,
    Int8,
    IntN,
    Flt4,
    Flt8,
    Real,
    Numeric,
    Money4,
    Money,
    MoneyN,
    Decimal,
    Char,
    VarChar,
    NVarChar,
    Text,
    NText,
    DateTime,
    DateTime4,
    DateTimeN,
    Date,
    Time,
    BigDateTime,
    BigTime,
    MsDate,
    MsTime,
    MsDateTime2,
    MsDateTimeOffset,
    Image,
    Binary,
    VarBinary,
    Void,
}

impl TypeTag {
    /// Every tag, in protocol order.
    pub const ALL: [TypeTag; 34] = [
        TypeTag::Bit,
        TypeTag::Int1,
        TypeTag::Int2,
        TypeTag::Int4,
        TypeTag::Int8,
        TypeTag::IntN,
        TypeTag::Flt4,
        TypeTag::Flt8,
        TypeTag::Real,
        TypeTag::Numeric,
        TypeTag::Money4,
        TypeTag::Money,
        TypeTag::MoneyN,
        TypeTag::Decimal,
        TypeTag::Char,
        TypeTag::VarChar,
        TypeTag::NVarChar,
        TypeTag::Text,
        TypeTag::NText,
        TypeTag::DateTime,
        TypeTag::DateTime4,
        TypeTag::DateTimeN,
        TypeTag::Date,
        TypeTag::Time,
        TypeTag::BigDateTime,
        TypeTag::BigTime,
        TypeTag::MsDate,
        TypeTag::MsTime,
        TypeTag::MsDateTime2,
        TypeTag::MsDateTimeOffset,
        TypeTag::Image,
        TypeTag::Binary,
        TypeTag::VarBinary,
        TypeTag::Void,
    ];

    /// SQL-ish name used in diagnostics and serialized output.
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Bit => "bit",
            TypeTag::Int1 => "tinyint",
            TypeTag::Int2 => "smallint",
            TypeTag::Int4 => "int",
            TypeTag::Int8 => "bigint",
            TypeTag::IntN => "intn",
            TypeTag::Flt4 => "float4",
            TypeTag::Flt8 => "float",
            TypeTag::Real => "real",
            TypeTag::Numeric => "numeric",
            TypeTag::Money4 => "smallmoney",
            TypeTag::Money => "money",
            TypeTag::MoneyN => "moneyn",
            TypeTag::Decimal => "decimal",
            TypeTag::Char => "char",
            TypeTag::VarChar => "varchar",
            TypeTag::NVarChar => "nvarchar",
            TypeTag::Text => "text",
            TypeTag::NText => "ntext",
            TypeTag::DateTime => "datetime",
            TypeTag::DateTime4 => "smalldatetime",
            TypeTag::DateTimeN => "datetimn",
            TypeTag::Date => "date",
            TypeTag::Time => "time",
            TypeTag::BigDateTime => "bigdatetime",
            TypeTag::BigTime => "bigtime",
            TypeTag::MsDate => "msdate",
            TypeTag::MsTime => "mstime",
            TypeTag::MsDateTime2 => "datetime2",
            TypeTag::MsDateTimeOffset => "datetimeoffset",
            TypeTag::Image => "image",
            TypeTag::Binary => "binary",
            TypeTag::VarBinary => "varbinary",
            TypeTag::Void => "void",
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Outcome of fetching one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowToken {
    /// A regular data row is sitting in the bound buffers.
    Row,
    /// No more rows in the current result set.
    Done,
    /// The driver's row buffer is exhausted.
    BufferFull,
    /// A row kind this layer does not recognize.
    Other(i32),
}

/// One column's bound data for the current row.
#[derive(Debug, Clone, Copy)]
pub struct RawColumn<'a> {
    pub bytes: &'a [u8],
    pub is_null: bool,
}

/// Factory for physical sessions. Each `open_session` call mints a
/// fresh connection; the driver keeps no claim on sessions it handed
/// out.
pub trait TdsDriver: Send {
    /// Open a session for `login`.
    ///
    /// The sink is the driver's channel for asynchronous messages and
    /// graded errors; implementations keep a clone for the session's
    /// lifetime. A driver that refuses an operation is expected to put
    /// at least one graded error on the sink before returning failure.
    fn open_session(
        &mut self,
        login: &Login,
        sink: EventSink,
    ) -> Result<Box<dyn TdsSession>, OpenError>;
}

/// One open physical connection.
///
/// Column ordinals are 1-based throughout, as the protocol reports
/// them. All methods block until the wire answers.
pub trait TdsSession: Send {
    /// Switch the session to `database`.
    fn use_database(&mut self, database: &str) -> Result<(), DriverError>;

    /// Set the timeout applied to subsequent operations, in seconds.
    fn set_timeout(&mut self, secs: u32) -> Result<(), DriverError>;

    /// Compile and start executing one SQL batch.
    fn execute(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Advance to the next result set. `Ok(true)` means one is ready;
    /// `Ok(false)` means the batch has no more.
    fn next_result_set(&mut self) -> Result<bool, DriverError>;

    /// Number of columns in the current result set.
    fn column_count(&self) -> usize;

    /// Name of a column in the current result set.
    fn column_name(&self, ordinal: usize) -> String;

    /// Protocol type tag of a column.
    fn column_type(&self, ordinal: usize) -> TypeTag;

    /// Declared byte length of a column.
    fn column_length(&self, ordinal: usize) -> usize;

    /// Widest character form the driver can convert `tag` into, in
    /// bytes. Zero means the type has no usable character conversion.
    fn convert_width(&self, tag: TypeTag) -> usize;

    /// Bind a column's data and null-status slot, sized `width` bytes.
    fn bind_column(&mut self, ordinal: usize, width: usize) -> Result<(), DriverError>;

    /// Fetch the next row into the bound slots.
    fn next_row(&mut self) -> Result<RowToken, DriverError>;

    /// Bound data of one column for the row just fetched.
    fn column_data(&self, ordinal: usize) -> RawColumn<'_>;

    /// Drop any pending output of the current batch.
    fn flush(&mut self);

    /// Probe for this session's liveness, shareable across threads.
    fn liveness(&self) -> Arc<dyn Liveness>;

    /// Tear the connection down. Exactly once per session.
    fn close(self: Box<Self>);
}
