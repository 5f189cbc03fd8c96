//! The asynchronous client surface.
//!
//! [`SqlClient`] is a cheap cloneable handle. Every operation it
//! exposes is queued onto one serial worker (see `worker.rs`), so
//! operations run in submission order and never overlap; the async
//! methods just await their operation's outcome. Driver messages and
//! errors travel a separate path: a delivery task spawned on a
//! caller-chosen runtime hands them to the [`MessageObserver`].
//!
//! Split across modules:
//! - `mod.rs` - client handle, builder, observer
//! - `connection.rs` - session lifecycle and liveness
//! - `executor.rs` - statement execution and result assembly
//! - `worker.rs` - the serial command loop

mod connection;
mod executor;
mod worker;

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::config::ClientConfig;
use crate::driver::{Event, EventSink, TdsDriver};
use crate::error::{ClientError, ClientResult};
use crate::rows::ResultSet;

use connection::LivenessSlot;
use worker::Command;

/// Receives driver messages and graded errors on the delivery task.
///
/// Callbacks fire zero or more times per operation and are independent
/// of the operation's own outcome; a failed execute typically reports
/// its failure here *and* through the returned error.
pub trait MessageObserver: Send + Sync {
    /// An informational message.
    fn on_message(&self, text: &str);

    /// A graded error, with the driver's code and severity.
    fn on_error(&self, text: &str, code: i32, severity: i32);
}

/// Default observer: forwards everything to `tracing`.
#[derive(Debug, Default)]
pub struct LogObserver;

impl MessageObserver for LogObserver {
    fn on_message(&self, text: &str) {
        info!("server message: {text}");
    }

    fn on_error(&self, text: &str, code: i32, severity: i32) {
        error!(code, severity, "server error: {text}");
    }
}

/// Asynchronous client over one database connection.
///
/// Clones share the same worker, so they also share the one physical
/// session and its strict operation ordering. Dropping the last clone
/// shuts the worker down and closes any open session.
#[derive(Clone)]
pub struct SqlClient {
    commands: mpsc::UnboundedSender<Command>,
    liveness: LivenessSlot,
}

impl SqlClient {
    /// Start building a client around a driver.
    pub fn builder<D: TdsDriver + 'static>(driver: D) -> SqlClientBuilder<D> {
        SqlClientBuilder {
            driver,
            config: ClientConfig::default(),
            observer: None,
            delivery: None,
        }
    }

    /// Open a connection, replacing any current one.
    ///
    /// Resolves `Ok` only once the login record is accepted, the open
    /// and database switch go through, and the fresh session still
    /// probes alive. The password is dropped when the attempt
    /// finishes, on both outcomes.
    pub async fn connect(
        &self,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> ClientResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Connect {
                host: host.into(),
                username: username.into(),
                password: password.into(),
                database: database.into(),
                reply,
            })
            .map_err(|_| ClientError::Closed)?;
        outcome.await.map_err(|_| ClientError::Closed)?
    }

    /// Run one SQL batch and collect everything it returns.
    pub async fn execute(&self, sql: impl Into<String>) -> ClientResult<ResultSet> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Execute {
                sql: sql.into(),
                reply,
            })
            .map_err(|_| ClientError::Closed)?;
        outcome.await.map_err(|_| ClientError::Closed)?
    }

    /// Point-in-time liveness of the underlying session.
    ///
    /// False before the first connect and after disconnect. Probes the
    /// driver directly, never a cache, and carries no ordering against
    /// operations still in the queue.
    pub fn is_connected(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Queue a disconnect and return immediately.
    ///
    /// The session closes once every operation queued ahead has
    /// finished. Disconnecting twice, or without a session, is a
    /// no-op.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }
}

/// Configures and starts a [`SqlClient`].
pub struct SqlClientBuilder<D> {
    driver: D,
    config: ClientConfig,
    observer: Option<Arc<dyn MessageObserver>>,
    delivery: Option<Handle>,
}

impl<D: TdsDriver + 'static> SqlClientBuilder<D> {
    /// Timeout and charset settings.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Observer for driver messages and errors. Defaults to
    /// [`LogObserver`].
    pub fn observer(mut self, observer: Arc<dyn MessageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runtime the observer callbacks are delivered on. Defaults to
    /// the runtime `build` is called from.
    pub fn delivery(mut self, handle: Handle) -> Self {
        self.delivery = Some(handle);
        self
    }

    /// Spawn the worker and the delivery task, and hand out the
    /// client.
    ///
    /// # Panics
    ///
    /// Panics if no delivery handle was set and `build` is called
    /// outside a tokio runtime.
    pub fn build(self) -> SqlClient {
        let observer = self
            .observer
            .unwrap_or_else(|| Arc::new(LogObserver) as Arc<dyn MessageObserver>);
        let handle = self.delivery.unwrap_or_else(Handle::current);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(event_tx);
        let liveness = LivenessSlot::default();
        let commands = worker::spawn(self.driver, self.config, sink, liveness.clone());
        handle.spawn(deliver(event_rx, observer));

        SqlClient { commands, liveness }
    }
}

/// Forwards events to the observer until every sink clone is gone.
async fn deliver(mut events: mpsc::UnboundedReceiver<Event>, observer: Arc<dyn MessageObserver>) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Message(text) => observer.on_message(&text),
            Event::Error {
                text,
                code,
                severity,
            } => observer.on_error(&text, code, severity),
        }
    }
}
