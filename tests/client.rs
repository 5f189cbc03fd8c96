//! End-to-end tests: the async client driving the scripted replay
//! driver through connect, execute, and disconnect.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tdslink::client::{MessageObserver, SqlClient};
use tdslink::config::ClientConfig;
use tdslink::driver::{
    DriverError, EventSink, Login, Op, OpenError, ReplayDriver, SessionScript, StatementScript,
    TableScript, TdsDriver, TdsSession, TypeTag,
};
use tdslink::error::ClientError;
use tdslink::value::Value;

/// Observer that records every callback for later assertions.
#[derive(Default)]
struct CollectingObserver {
    messages: Mutex<Vec<String>>,
    errors: Mutex<Vec<(String, i32, i32)>>,
}

impl CollectingObserver {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn error_codes(&self) -> Vec<i32> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .map(|(_, code, _)| *code)
            .collect()
    }
}

impl MessageObserver for CollectingObserver {
    fn on_message(&self, text: &str) {
        self.messages.lock().unwrap().push(text.to_string());
    }

    fn on_error(&self, text: &str, code: i32, severity: i32) {
        self.errors
            .lock()
            .unwrap()
            .push((text.to_string(), code, severity));
    }
}

/// Delivery runs on its own task, so observable side effects need a
/// moment to land.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within a second");
}

async fn connect(client: &SqlClient) {
    client
        .connect("db.example.com", "sa", "secret", "sales")
        .await
        .unwrap();
}

/// Driver that dies during open, taking the worker thread with it.
struct CrashingDriver;

impl TdsDriver for CrashingDriver {
    fn open_session(
        &mut self,
        _login: &Login,
        _sink: EventSink,
    ) -> Result<Box<dyn TdsSession>, OpenError> {
        panic!("wire layer gave out");
    }
}

#[tokio::test]
async fn test_connect_success() {
    let client = SqlClient::builder(ReplayDriver::new().session(SessionScript::new())).build();

    assert!(!client.is_connected());
    connect(&client).await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_connect_failure_reaches_observer() {
    let observer = Arc::new(CollectingObserver::default());
    let driver = ReplayDriver::new().session(SessionScript::open_refused(DriverError::new(
        "adaptive server is unavailable",
        20009,
        9,
    )));
    let client = SqlClient::builder(driver).observer(observer.clone()).build();

    let err = client
        .connect("db.example.com", "sa", "secret", "sales")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));
    assert!(!client.is_connected());

    wait_until(|| !observer.error_codes().is_empty()).await;
    assert_eq!(observer.error_codes(), vec![20009]);
}

#[tokio::test]
async fn test_execute_single_select() {
    let driver = ReplayDriver::new().session(
        SessionScript::new().statement(
            StatementScript::new("SELECT 1 AS x").table(
                TableScript::new()
                    .column("x", TypeTag::Int4, 4)
                    .row(vec![Some("1")]),
            ),
        ),
    );
    let client = SqlClient::builder(driver).build();
    connect(&client).await;

    let results = client.execute("SELECT 1 AS x").await.unwrap();
    assert_eq!(results.len(), 1);
    let table = results.first().unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.first().unwrap()["x"], Value::Int(1));
}

#[tokio::test]
async fn test_execute_syntax_error() {
    let observer = Arc::new(CollectingObserver::default());
    let driver = ReplayDriver::new().session(SessionScript::new().statement(
        StatementScript::failing(
            "SELEKT 1",
            DriverError::new("incorrect syntax near 'SELEKT'", 102, 15),
        ),
    ));
    let client = SqlClient::builder(driver).observer(observer.clone()).build();
    connect(&client).await;

    let err = client.execute("SELEKT 1").await.unwrap_err();
    assert!(matches!(err, ClientError::Execution(_)));

    wait_until(|| !observer.error_codes().is_empty()).await;
    assert_eq!(observer.error_codes(), vec![102]);
}

#[tokio::test]
async fn test_batch_returns_tables_in_statement_order() {
    let driver = ReplayDriver::new().session(
        SessionScript::new().statement(
            StatementScript::new("SELECT 1 AS a; SELECT 'x' AS b")
                .table(
                    TableScript::new()
                        .column("a", TypeTag::Int4, 4)
                        .row(vec![Some("1")]),
                )
                .table(
                    TableScript::new()
                        .column("b", TypeTag::VarChar, 8)
                        .row(vec![Some("x")]),
                ),
        ),
    );
    let client = SqlClient::builder(driver).build();
    connect(&client).await;

    let results = client.execute("SELECT 1 AS a; SELECT 'x' AS b").await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].first().unwrap()["a"], Value::Int(1));
    assert_eq!(results[1].first().unwrap()["b"], Value::Text("x".into()));
}

#[tokio::test]
async fn test_money_and_datetime_come_back_unsupported() {
    let driver = ReplayDriver::new().session(
        SessionScript::new().statement(
            StatementScript::new("SELECT price, sold_at FROM sales").table(
                TableScript::new()
                    .column("price", TypeTag::Money, 8)
                    .column("sold_at", TypeTag::DateTime, 8)
                    .row(vec![Some("12.34"), Some("2004-01-01 10:00:00")]),
            ),
        ),
    );
    let client = SqlClient::builder(driver).build();
    connect(&client).await;

    let results = client.execute("SELECT price, sold_at FROM sales").await.unwrap();
    let row = results[0].first().unwrap();
    assert_eq!(row["price"], Value::Unsupported(TypeTag::Money));
    assert_eq!(row["sold_at"], Value::Unsupported(TypeTag::DateTime));
}

#[tokio::test]
async fn test_null_cells_decode_to_null() {
    let driver = ReplayDriver::new().session(
        SessionScript::new().statement(
            StatementScript::new("q").table(
                TableScript::new()
                    .column("a", TypeTag::Int4, 4)
                    .column("b", TypeTag::VarChar, 8)
                    .row(vec![None::<&str>, None]),
            ),
        ),
    );
    let client = SqlClient::builder(driver).build();
    connect(&client).await;

    let results = client.execute("q").await.unwrap();
    let row = results[0].first().unwrap();
    assert!(row.is_null("a"));
    assert!(row.is_null("b"));
}

#[tokio::test]
async fn test_operations_run_in_submission_order() {
    let driver = ReplayDriver::new().session(
        SessionScript::new()
            .statement(
                StatementScript::new("first").table(
                    TableScript::new()
                        .column("n", TypeTag::Int4, 4)
                        .row(vec![Some("1")]),
                ),
            )
            .statement(
                StatementScript::new("second").table(
                    TableScript::new()
                        .column("n", TypeTag::Int4, 4)
                        .row(vec![Some("2")]),
                ),
            ),
    );
    let log = driver.log();
    let client = SqlClient::builder(driver).build();
    connect(&client).await;

    let (first, second) = tokio::join!(client.execute("first"), client.execute("second"));
    first.unwrap();
    second.unwrap();

    let executes: Vec<String> = log
        .snapshot()
        .into_iter()
        .filter_map(|op| match op {
            Op::Execute(sql) => Some(sql),
            _ => None,
        })
        .collect();
    assert_eq!(executes, vec!["first".to_string(), "second".to_string()]);
}

#[tokio::test]
async fn test_unknown_row_kind_reaches_observer_as_message() {
    let observer = Arc::new(CollectingObserver::default());
    let driver = ReplayDriver::new().session(
        SessionScript::new().statement(
            StatementScript::new("q").table(
                TableScript::new()
                    .column("n", TypeTag::Int4, 4)
                    .row(vec![Some("1")])
                    .row_kind(98)
                    .row(vec![Some("2")]),
            ),
        ),
    );
    let client = SqlClient::builder(driver).observer(observer.clone()).build();
    connect(&client).await;

    let results = client.execute("q").await.unwrap();
    assert_eq!(results[0].len(), 2);

    wait_until(|| !observer.messages().is_empty()).await;
    assert!(
        observer
            .messages()
            .iter()
            .any(|m| m.contains("unknown row kind 98"))
    );
    // Skipping stayed non-fatal: no error callbacks.
    assert!(observer.error_codes().is_empty());
}

#[tokio::test]
async fn test_disconnect_lifecycle() {
    let driver = ReplayDriver::new()
        .session(SessionScript::new())
        .session(SessionScript::new());
    let client = SqlClient::builder(driver).build();

    connect(&client).await;
    assert!(client.is_connected());

    client.disconnect();
    wait_until(|| !client.is_connected()).await;

    // A second disconnect with nothing open is a no-op.
    client.disconnect();

    let err = client.execute("q").await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));

    // A fresh connect opens the next scripted session.
    connect(&client).await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_killed_server_shows_in_is_connected() {
    let driver = ReplayDriver::new().session(SessionScript::new());
    let alive = driver.alive_flag();
    let client = SqlClient::builder(driver).build();
    connect(&client).await;

    assert!(client.is_connected());
    alive.store(false, Ordering::SeqCst);
    // Liveness is consulted on every call; no cache to go stale.
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_driver_panic_reports_closed() {
    let client = SqlClient::builder(CrashingDriver).build();

    // The worker dies mid-connect; the call resolves rather than hangs.
    let err = client
        .connect("db.example.com", "sa", "secret", "sales")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Closed));

    // Everything submitted after the crash is refused the same way.
    let err = client.execute("SELECT 1").await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_configured_timeout_applied_per_execute() {
    let driver = ReplayDriver::new().session(
        SessionScript::new().statement(
            StatementScript::new("q").table(
                TableScript::new()
                    .column("n", TypeTag::Int4, 4)
                    .row(vec![Some("1")]),
            ),
        ),
    );
    let log = driver.log();
    let config = ClientConfig {
        timeout_secs: 30,
        charset: "UTF-8".to_string(),
    };
    let client = SqlClient::builder(driver).config(config).build();
    connect(&client).await;
    client.execute("q").await.unwrap();

    let ops = log.snapshot();
    let timeout_at = ops.iter().position(|op| *op == Op::SetTimeout(30)).unwrap();
    let execute_at = ops
        .iter()
        .position(|op| *op == Op::Execute("q".into()))
        .unwrap();
    let flush_at = ops.iter().position(|op| *op == Op::Flush).unwrap();
    assert!(timeout_at < execute_at);
    assert!(execute_at < flush_at);
}

#[tokio::test]
async fn test_results_serialize_to_json() {
    let driver = ReplayDriver::new().session(
        SessionScript::new().statement(
            StatementScript::new("q").table(
                TableScript::new()
                    .column("x", TypeTag::Int4, 4)
                    .row(vec![Some("1")]),
            ),
        ),
    );
    let client = SqlClient::builder(driver).build();
    connect(&client).await;

    let results = client.execute("q").await.unwrap();
    assert_eq!(serde_json::to_value(&results).unwrap(), json!([[{ "x": 1 }]]));
}

#[test]
fn test_delivery_on_explicit_runtime() {
    let main_rt = tokio::runtime::Runtime::new().unwrap();
    let delivery_rt = tokio::runtime::Runtime::new().unwrap();

    let observer = Arc::new(CollectingObserver::default());
    let driver = ReplayDriver::new().session(SessionScript::open_refused(DriverError::new(
        "unable to connect: server is unavailable",
        20009,
        9,
    )));
    // With an explicit delivery handle, build works outside a runtime.
    let client = SqlClient::builder(driver)
        .observer(observer.clone())
        .delivery(delivery_rt.handle().clone())
        .build();

    main_rt.block_on(async {
        let err = client
            .connect("db.example.com", "sa", "secret", "sales")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
    });

    for _ in 0..200 {
        if !observer.error_codes().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(observer.error_codes(), vec![20009]);
}
