//! The serial command worker.
//!
//! One dedicated thread owns the connection and drains an unbounded
//! command channel: strictly FIFO, one operation at a time, each run
//! to completion before the next starts. That queue is the only thing
//! standing between concurrent callers and a session handle that must
//! never be touched from two places at once.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::config::ClientConfig;
use crate::driver::{EventSink, TdsDriver};
use crate::error::ClientResult;
use crate::rows::ResultSet;

use super::connection::{Connection, LivenessSlot};

/// One queued client operation.
pub(crate) enum Command {
    Connect {
        host: String,
        username: String,
        password: String,
        database: String,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Execute {
        sql: String,
        reply: oneshot::Sender<ClientResult<ResultSet>>,
    },
    Disconnect,
}

/// Spawn the worker thread and hand back its command sender.
///
/// The worker exits once every sender clone is gone, closing any open
/// session on the way out. If the thread cannot be spawned the sender
/// reports closed and every operation fails with `Closed`.
pub(crate) fn spawn<D>(
    driver: D,
    config: ClientConfig,
    sink: EventSink,
    liveness: LivenessSlot,
) -> mpsc::UnboundedSender<Command>
where
    D: TdsDriver + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("tdslink-worker".to_string())
        .spawn(move || run(driver, config, sink, liveness, rx));
    if let Err(e) = spawned {
        error!(error = %e, "failed to spawn worker thread");
    }
    tx
}

fn run<D: TdsDriver>(
    driver: D,
    config: ClientConfig,
    sink: EventSink,
    liveness: LivenessSlot,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut connection = Connection::new(driver, config, sink, liveness);

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Connect {
                host,
                username,
                password,
                database,
                reply,
            } => {
                let outcome = connection.connect(host, username, password, database);
                // A dropped reply means the caller gave up; the
                // connect still happened in queue order.
                let _ = reply.send(outcome);
            }
            Command::Execute { sql, reply } => {
                let _ = reply.send(connection.execute(&sql));
            }
            Command::Disconnect => connection.disconnect(),
        }
    }

    // Every client handle is gone.
    connection.disconnect();
    debug!("worker exiting");
}
