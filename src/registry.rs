//! Open connections and their place in a transaction.
//!
//! The transaction owns each connection through an [`FtpTransactionable`];
//! the registry keeps a weak id → connection map so lookups never scan the
//! open transactions. Once a transaction finishes, its connections are closed
//! and dropped, and their ids stop resolving.

use std::collections::HashMap;
use std::net::Shutdown;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use log::{debug, info, warn};

use super::ftp::FtpStream;
use super::transaction::{TransactionContext, Transactionable};
use super::types::{FtpError, Result};

pub type SharedConnection = Arc<Mutex<FtpConnection>>;

/// An authenticated control connection and the server it points at.
#[derive(Debug)]
pub struct FtpConnection {
    id: String,
    stream: Option<FtpStream>,
    host: String,
    port: u16,
    closed: bool,
    transfer_open: bool,
}

impl FtpConnection {
    pub fn new<I: Into<String>, H: Into<String>>(id: I, stream: FtpStream, host: H, port: u16) -> FtpConnection {
        FtpConnection {
            id: id.into(),
            stream: Some(stream),
            host: host.into(),
            port,
            closed: false,
            transfer_open: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Fails if the connection can no longer carry commands.
    pub fn ensure_usable(&self) -> Result<()> {
        if self.closed || self.stream.is_none() {
            return Err(FtpError::InvalidState(format!(
                "The ftp connection {} is closed",
                self.id
            )));
        }
        if self.transfer_open {
            return Err(FtpError::InvalidState(format!(
                "A retrieval stream is still open on ftp connection {}",
                self.id
            )));
        }
        Ok(())
    }

    pub fn stream_mut(&mut self) -> Result<&mut FtpStream> {
        self.ensure_usable()?;
        self.stream
            .as_mut()
            .ok_or_else(|| FtpError::InvalidState(format!("The ftp connection {} is closed", self.id)))
    }

    pub(crate) fn begin_transfer(&mut self) {
        self.transfer_open = true;
    }

    pub(crate) fn end_transfer(&mut self) {
        self.transfer_open = false;
    }

    /// Logs out and disconnects. Runs once; later calls do nothing.
    /// A failed logout is ignored, a failed disconnect is only logged.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transfer_open = false;
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        if let Err(err) = stream.quit() {
            warn!("Could not log out from the ftp client {}: {}", self.id, err);
        }
        match stream.get_ref().shutdown(Shutdown::Both) {
            Ok(()) => debug!("ftp connection {} to {}:{} closed", self.id, self.host, self.port),
            // the server hangs up after answering QUIT
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => {}
            Err(err) => warn!("Could not close ftp connection {} properly: {}", self.id, err),
        }
    }
}

impl Drop for FtpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Locks a connection, recovering it if a previous holder panicked.
pub fn lock_connection(connection: &SharedConnection) -> MutexGuard<'_, FtpConnection> {
    connection.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The transaction-side handle of a connection. Commit and rollback both
/// close the connection.
pub struct FtpTransactionable {
    id: String,
    connection: SharedConnection,
}

impl FtpTransactionable {
    pub fn new(connection: SharedConnection) -> FtpTransactionable {
        let id = lock_connection(&connection).id().to_string();
        FtpTransactionable { id, connection }
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }
}

impl Transactionable for FtpTransactionable {
    fn id(&self) -> &str {
        &self.id
    }

    fn commit(&mut self) {
        info!("closing ftp connection {} on commit", self.id);
        lock_connection(&self.connection).close();
    }

    fn rollback(&mut self) {
        info!("closing ftp connection {} on rollback", self.id);
        lock_connection(&self.connection).close();
    }
}

pub struct ConnectionRegistry {
    context: Arc<TransactionContext>,
    connections: RwLock<HashMap<String, Weak<Mutex<FtpConnection>>>>,
}

impl ConnectionRegistry {
    pub fn new(context: Arc<TransactionContext>) -> ConnectionRegistry {
        ConnectionRegistry {
            context,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<TransactionContext> {
        &self.context
    }

    /// Hands `connection` to the transaction `transaction_id` and makes it
    /// resolvable by id until that transaction finishes.
    pub fn register(&self, transaction_id: &str, connection: FtpConnection) -> SharedConnection {
        let id = connection.id().to_string();
        let shared = Arc::new(Mutex::new(connection));
        {
            let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
            connections.retain(|_, weak| weak.strong_count() > 0);
            connections.insert(id, Arc::downgrade(&shared));
        }
        self.context
            .push(transaction_id, Box::new(FtpTransactionable::new(Arc::clone(&shared))));
        shared
    }

    /// Finds a live connection by id. The map lock is released before the
    /// connection itself is locked.
    pub fn lookup(&self, connection_id: &str) -> Result<SharedConnection> {
        let connection = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connection_id)
            .and_then(Weak::upgrade);
        connection
            .filter(|connection| !lock_connection(connection).is_closed())
            .ok_or_else(|| FtpError::InvalidState("No such ftp connection found".to_string()))
    }

    /// Number of connections still owned by an open transaction.
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
