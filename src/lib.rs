//! # tdslink — async SQL client over a blocking TDS driver
//!
//! > One worker thread, one connection, strictly ordered operations.
//!
//! tdslink wraps a blocking TDS wire driver in a non-blocking client:
//! connects, executes, and disconnects queue onto a single serial
//! worker, and every result set comes back decoded into name-keyed,
//! typed rows. The wire layer is pluggable: anything implementing
//! [`driver::TdsDriver`] plugs in, and the built-in
//! [`driver::ReplayDriver`] runs the whole stack without a server.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use tdslink::prelude::*;
//!
//! let client = SqlClient::builder(driver).build();
//! client.connect("db.example.com", "sa", "secret", "sales").await?;
//!
//! let results = client.execute("SELECT id, name FROM customers").await?;
//! for row in results.first().into_iter().flatten() {
//!     println!("{:?} {:?}", row.get_i64("id"), row.get_str("name"));
//! }
//!
//! client.disconnect();
//! ```
//!
//! ## Decoding
//!
//! | Column family        | Value variant          |
//! |----------------------|------------------------|
//! | bit                  | `Bool`                 |
//! | integers             | `Int` (widened)        |
//! | floats, numeric      | `Float` (widened)      |
//! | char/text            | `Text`                 |
//! | binary/varbinary     | `Binary`               |
//! | image                | `Image` (hex-decoded)  |
//! | money, date/time     | `Unsupported(tag)`     |
//!
//! SQL null decodes to `Value::Null` whatever the column type.

pub mod client;
pub mod config;
pub mod decode;
pub mod driver;
pub mod error;
pub mod rows;
pub mod value;

pub mod prelude {
    pub use crate::client::{LogObserver, MessageObserver, SqlClient, SqlClientBuilder};
    pub use crate::config::ClientConfig;
    pub use crate::driver::{TdsDriver, TdsSession, TypeTag};
    pub use crate::error::{ClientError, ClientResult};
    pub use crate::rows::{ResultSet, Row, Table};
    pub use crate::value::Value;
}
