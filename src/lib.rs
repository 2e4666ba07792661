#![crate_type = "lib"]

//! ftp-bridge keeps FTP connections inside a host transaction and forwards a
//! handful of file operations to them.
//!
//! A connection is opened with [`Services::connect`] under a transaction id.
//! It is then addressed by the returned connection id until the host commits
//! or rolls back that transaction through its [`TransactionContext`], at which
//! point the connection is logged out and closed.
//!
//! ### Usage
//!
//! ```rust,no_run
//! use std::io::{Cursor, Read};
//! use std::sync::Arc;
//! use ftp_bridge::{Services, TransactionContext};
//!
//! let context = Arc::new(TransactionContext::new());
//! let services = Services::new(Arc::clone(&context));
//!
//! let details = services
//!     .connect("tx-1", "127.0.0.1", None, "anonymous", "guest", None)
//!     .unwrap();
//! let id = &details.connection_id;
//!
//! services.write(id, Some("ftp://127.0.0.1/in/hello.txt"), &mut Cursor::new("hello")).unwrap();
//! for entry in services.list(id, Some("/in"), Some(r".*\.txt")).unwrap() {
//!     println!("{} {:?}", entry.path, entry.size);
//! }
//!
//! let mut reader = services.read(id, "/in/hello.txt").unwrap();
//! let mut text = String::new();
//! reader.read_to_string(&mut text).unwrap();
//! reader.finish().unwrap();
//!
//! services.delete(id, "/in/hello.txt").unwrap();
//! context.commit("tx-1");
//! ```
//!
//! The underlying client, [`FtpStream`], can also be used on its own.

#[macro_use]
extern crate lazy_static;

mod data_stream;
mod ftp;
pub mod config;
pub mod encoding;
pub mod listing;
pub mod path;
pub mod registry;
pub mod services;
pub mod status;
pub mod transaction;
pub mod types;

pub use self::config::ClientConfig;
pub use self::data_stream::DataStream;
pub use self::encoding::ControlEncoding;
pub use self::ftp::FtpStream;
pub use self::services::{ConnectionDetails, FileEntry, RemoteReader, Services};
pub use self::transaction::{TransactionContext, Transactionable};
pub use self::types::{FtpError, Reply, Result};
