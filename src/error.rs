//! Error types for tdslink.

use thiserror::Error;

use crate::driver::OpenError;

/// The main error type for client operations.
///
/// Every fatal condition aborts the single operation that hit it and
/// travels back on that operation's outcome channel; nothing here is
/// process-fatal and nothing is retried.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The driver rejected the login record built from the credentials.
    #[error("Login error: {0}")]
    Login(String),

    /// Opening the session, switching databases, or the post-open
    /// liveness check failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The SQL batch was rejected at compile or execute time.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Result-set metadata could not be read, or a column bind was
    /// rejected.
    #[error("Result-set error: {0}")]
    ResultSet(String),

    /// The driver failed partway through fetching rows.
    #[error("Row fetch error: {0}")]
    RowFetch(String),

    /// The driver's row buffer is exhausted.
    #[error("Row buffer full: {0}")]
    BufferFull(String),

    /// A column reported a zero bind width, so no buffer can be
    /// allocated for it.
    #[error("Resource error: {0}")]
    Resource(String),

    /// An operation that needs an open session ran without one.
    #[error("Not connected")]
    NotConnected,

    /// The worker is gone; no further operations can run.
    #[error("Client closed")]
    Closed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<OpenError> for ClientError {
    fn from(e: OpenError) -> Self {
        match e {
            OpenError::Login(err) => ClientError::Login(err.to_string()),
            OpenError::Connection(err) => ClientError::Connection(err.to_string()),
        }
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;

    #[test]
    fn test_error_display() {
        let err = ClientError::Execution("syntax error near 'FROM'".to_string());
        assert_eq!(err.to_string(), "Execution error: syntax error near 'FROM'");

        let err = ClientError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_open_error_conversion() {
        let login: ClientError =
            OpenError::Login(DriverError::new("bad login record", 20012, 9)).into();
        assert!(matches!(login, ClientError::Login(_)));
        assert_eq!(login.to_string(), "Login error: bad login record");

        let conn: ClientError =
            OpenError::Connection(DriverError::new("host unreachable", 20009, 9)).into();
        assert!(matches!(conn, ClientError::Connection(_)));
    }
}
