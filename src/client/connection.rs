//! Connection lifecycle: open, liveness, teardown.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::driver::{EventSink, Liveness, Login, TdsDriver, TdsSession};
use crate::error::{ClientError, ClientResult};

/// Slot the worker publishes the live session's probe into.
///
/// `SqlClient::is_connected` reads it from any thread without going
/// through the command queue, so the answer is point-in-time and
/// carries no ordering against queued operations.
#[derive(Clone, Default)]
pub(crate) struct LivenessSlot {
    probe: Arc<Mutex<Option<Arc<dyn Liveness>>>>,
}

impl LivenessSlot {
    pub(crate) fn is_alive(&self) -> bool {
        self.probe
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|probe| probe.is_alive()))
            .unwrap_or(false)
    }

    fn publish(&self, probe: Arc<dyn Liveness>) {
        if let Ok(mut slot) = self.probe.lock() {
            *slot = Some(probe);
        }
    }

    fn clear(&self) {
        if let Ok(mut slot) = self.probe.lock() {
            *slot = None;
        }
    }
}

/// Owns the one physical session and walks it through its lifecycle.
///
/// Lives on the worker thread; nothing here is called concurrently.
pub(crate) struct Connection<D> {
    driver: D,
    session: Option<Box<dyn TdsSession>>,
    config: ClientConfig,
    sink: EventSink,
    liveness: LivenessSlot,
}

impl<D: TdsDriver> Connection<D> {
    pub(crate) fn new(
        driver: D,
        config: ClientConfig,
        sink: EventSink,
        liveness: LivenessSlot,
    ) -> Self {
        Self {
            driver,
            session: None,
            config,
            sink,
            liveness,
        }
    }

    /// Open a fresh session, replacing any current one.
    ///
    /// Succeeds only if the login record is accepted, the open goes
    /// through, the database switch goes through, and the new session
    /// still probes alive afterwards. `login` owns the only copy of
    /// the password and drops on every path out of this call.
    pub(crate) fn connect(
        &mut self,
        host: String,
        username: String,
        password: String,
        database: String,
    ) -> ClientResult<()> {
        self.disconnect();

        let login = Login {
            host,
            username,
            password,
            database,
            charset: self.config.charset.clone(),
            timeout_secs: self.config.timeout_secs,
        };

        info!(host = %login.host, database = %login.database, "connecting");
        let mut session = self.driver.open_session(&login, self.sink.clone())?;

        if let Err(e) = session.use_database(&login.database) {
            session.close();
            return Err(ClientError::Connection(e.to_string()));
        }

        // A clean open is not proof of life; re-probe before reporting
        // success.
        let probe = session.liveness();
        if !probe.is_alive() {
            warn!("session probed dead right after open");
            session.close();
            return Err(ClientError::Connection(
                "session dead after open".to_string(),
            ));
        }

        self.liveness.publish(probe);
        self.session = Some(session);
        info!("connected");
        Ok(())
    }

    /// Close the current session, if any. Safe to call repeatedly.
    pub(crate) fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            info!("disconnecting");
            self.liveness.clear();
            session.close();
        }
    }

    /// The open session, or `NotConnected`.
    pub(crate) fn session_mut(&mut self) -> ClientResult<&mut dyn TdsSession> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(ClientError::NotConnected),
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn sink(&self) -> &EventSink {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, Op, ReplayDriver, SessionScript};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    fn connection(driver: ReplayDriver) -> (Connection<ReplayDriver>, LivenessSlot) {
        let (sink, _events) = EventSink::channel();
        let liveness = LivenessSlot::default();
        (
            Connection::new(driver, ClientConfig::default(), sink, liveness.clone()),
            liveness,
        )
    }

    fn connect(conn: &mut Connection<ReplayDriver>) -> ClientResult<()> {
        conn.connect(
            "db.example.com".into(),
            "sa".into(),
            "secret".into(),
            "master".into(),
        )
    }

    #[test]
    fn test_connect_publishes_liveness() {
        let (mut conn, liveness) = connection(ReplayDriver::new().session(SessionScript::new()));
        assert!(!liveness.is_alive());

        connect(&mut conn).unwrap();
        assert!(liveness.is_alive());

        conn.disconnect();
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_connect_maps_open_refusals() {
        let driver = ReplayDriver::new()
            .session(SessionScript::login_refused(DriverError::new(
                "bad login", 20012, 9,
            )))
            .session(SessionScript::open_refused(DriverError::new(
                "unreachable",
                20009,
                9,
            )));
        let (mut conn, liveness) = connection(driver);

        assert!(matches!(connect(&mut conn), Err(ClientError::Login(_))));
        assert!(matches!(
            connect(&mut conn),
            Err(ClientError::Connection(_))
        ));
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_database_refusal_closes_fresh_session() {
        let driver = ReplayDriver::new().session(
            SessionScript::new().database_refused(DriverError::new("no such database", 911, 11)),
        );
        let log = driver.log();
        let (mut conn, liveness) = connection(driver);

        let err = connect(&mut conn).unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
        assert!(!liveness.is_alive());
        // The half-open session was torn down.
        assert!(log.snapshot().contains(&Op::Close));
    }

    #[test]
    fn test_dead_probe_after_open_fails_connect() {
        let driver = ReplayDriver::new().session(SessionScript::new());
        let alive = driver.alive_flag();
        alive.store(false, Ordering::SeqCst);
        let (mut conn, liveness) = connection(driver);

        let err = connect(&mut conn).unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
        assert!(!liveness.is_alive());
    }

    #[test]
    fn test_reconnect_replaces_session_wholesale() {
        let driver = ReplayDriver::new()
            .session(SessionScript::new())
            .session(SessionScript::new());
        let log = driver.log();
        let (mut conn, _liveness) = connection(driver);

        connect(&mut conn).unwrap();
        connect(&mut conn).unwrap();

        let ops = log.snapshot();
        let closes = ops.iter().filter(|op| **op == Op::Close).count();
        let opens = ops
            .iter()
            .filter(|op| matches!(op, Op::Open { .. }))
            .count();
        assert_eq!(opens, 2);
        // The first session was closed before the second open.
        assert_eq!(closes, 1);
        assert!(
            ops.iter().position(|op| *op == Op::Close).unwrap()
                > ops.iter().position(|op| matches!(op, Op::Open { .. })).unwrap()
        );
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut conn, _liveness) = connection(ReplayDriver::new().session(SessionScript::new()));
        connect(&mut conn).unwrap();

        conn.disconnect();
        conn.disconnect();
        assert!(matches!(conn.session_mut(), Err(ClientError::NotConnected)));
    }
}
