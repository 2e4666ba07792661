//! The remote-callable surface: `connect`, `write`, `list`, `read` and `delete`.
//!
//! Every call after `connect` names its connection by id. The id is checked
//! first, then resolved, then the target is validated, and only then does
//! anything go over the wire.

use std::io::{self, BufReader, Read};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::config::ClientConfig;
use super::data_stream::DataStream;
use super::encoding::ControlEncoding;
use super::ftp::FtpStream;
use super::listing::{self, FileRecord};
use super::path;
use super::registry::{lock_connection, ConnectionRegistry, FtpConnection, SharedConnection};
use super::transaction::TransactionContext;
use super::types::{DataConnectionMode, FileType, FtpError, Result, TransferMode};

/// Content type reported for directories.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDetails {
    /// A unique id to reference this connection.
    pub connection_id: String,
    pub connected: bool,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub uri: String,
    pub path: String,
    pub name: String,
    pub content_type: Option<String>,
    /// Files only.
    pub size: Option<u64>,
    pub is_file: bool,
    /// Files only.
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileEntry {
    fn from_record(host: &str, port: u16, parent: &str, record: FileRecord) -> FileEntry {
        let path = path::child_path(parent, &record.name);
        let name = path::file_name(&path).to_string();
        let uri = entry_uri(host, port, &path);
        if record.is_directory() {
            FileEntry {
                uri,
                path,
                name,
                content_type: Some(DIRECTORY_CONTENT_TYPE.to_string()),
                size: None,
                is_file: false,
                last_modified: None,
            }
        } else {
            FileEntry {
                content_type: mime_guess::from_path(&name).first_raw().map(String::from),
                uri,
                path,
                name,
                size: record.size,
                is_file: true,
                last_modified: record.modified,
            }
        }
    }
}

fn entry_uri(host: &str, port: u16, path: &str) -> String {
    let authority = if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    match Url::parse(&format!("ftp://{}:{}", authority, port)) {
        Ok(mut uri) => {
            uri.set_path(path);
            uri.to_string()
        }
        Err(_) => format!("ftp://{}:{}{}", authority, port, path),
    }
}

/// A file being downloaded. Read it to the end, then call [`finish`](RemoteReader::finish)
/// to collect the server's closing reply. Dropping an unfinished reader does the
/// same, logging instead of returning a failure.
pub struct RemoteReader {
    connection: SharedConnection,
    data: Option<BufReader<DataStream>>,
}

impl RemoteReader {
    pub fn finish(mut self) -> Result<()> {
        self.complete()
    }

    fn complete(&mut self) -> Result<()> {
        let Some(data) = self.data.take() else {
            return Ok(());
        };
        drop(data);
        let mut connection = lock_connection(&self.connection);
        connection.end_transfer();
        connection.stream_mut()?.finalize_transfer()?;
        Ok(())
    }
}

impl Read for RemoteReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.data.as_mut() {
            Some(data) => data.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for RemoteReader {
    fn drop(&mut self) {
        if let Err(err) = self.complete() {
            warn!("Could not complete the ftp retrieval: {}", err);
        }
    }
}

pub struct Services {
    registry: ConnectionRegistry,
    config: ClientConfig,
}

impl Services {
    pub fn new(context: Arc<TransactionContext>) -> Services {
        Services::with_config(context, ClientConfig::default())
    }

    pub fn with_config(context: Arc<TransactionContext>, config: ClientConfig) -> Services {
        Services {
            registry: ConnectionRegistry::new(context),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Opens and authenticates a connection and registers it under
    /// `transaction_id`. Nothing is registered when any step fails.
    pub fn connect(
        &self,
        transaction_id: &str,
        host: &str,
        port: Option<u16>,
        username: &str,
        password: &str,
        control_encoding: Option<&str>,
    ) -> Result<ConnectionDetails> {
        if transaction_id.trim().is_empty() {
            return Err(FtpError::InvalidArgument(
                "You must send a transaction id".to_string(),
            ));
        }
        if host.trim().is_empty() {
            return Err(FtpError::InvalidArgument("You must send a host".to_string()));
        }
        let encoding = control_encoding
            .map(str::parse::<ControlEncoding>)
            .transpose()?;
        let port = port.unwrap_or(self.config.default_port);

        debug!("connecting to ftp server {}:{}", host, port);
        let mut stream = FtpStream::connect_timeout((host, port), self.config.connect_timeout())?;
        if let Some(encoding) = encoding {
            stream.set_control_encoding(encoding);
        }
        if let Err(err) = stream.login(username, password) {
            if let Err(shutdown) = stream.shutdown() {
                debug!("could not close ftp connection to {}:{} after failed login: {}", host, port, shutdown);
            }
            return Err(err.into_rejected("Could not log in to the ftp server"));
        }
        if encoding.is_none() && self.config.autodetect_utf8 {
            let features = stream.feat()?;
            if features
                .iter()
                .any(|f| f.eq_ignore_ascii_case("UTF8") || f.eq_ignore_ascii_case("UTF-8"))
            {
                stream.set_control_encoding(ControlEncoding::Utf8);
            }
        }
        stream.set_control_keep_alive(self.config.control_keep_alive());
        stream.set_data_connection_mode(self.config.data_connection_mode);

        let connection_id = Uuid::new_v4().simple().to_string();
        info!(
            "ftp connection {} to {}:{} joins transaction {} ({})",
            connection_id,
            host,
            port,
            transaction_id,
            stream.control_encoding()
        );
        self.registry.register(
            transaction_id,
            FtpConnection::new(connection_id.clone(), stream, host, port),
        );

        Ok(ConnectionDetails {
            connection_id,
            connected: true,
        })
    }

    /// Stores `input` at `target` as a binary stream-mode upload over a
    /// passive data connection.
    pub fn write<R: Read>(&self, connection_id: &str, target: Option<&str>, input: &mut R) -> Result<()> {
        let connection = self.retrieve(connection_id)?;
        forward(&connection, target, |connection, path| {
            let stream = connection.stream_mut()?;
            stream.transfer_type(FileType::Binary)?;
            stream.transfer_mode(TransferMode::Stream)?;
            stream.set_data_connection_mode(DataConnectionMode::Passive);
            stream
                .put(&path, input)
                .map_err(|err| err.into_rejected("Could not write file"))?;
            debug!("stored {} on ftp connection {}", path, connection.id());
            Ok(())
        })
    }

    /// Lists `target`, keeping only names that fully match `regex` when one is given.
    pub fn list(&self, connection_id: &str, target: Option<&str>, regex: Option<&str>) -> Result<Vec<FileEntry>> {
        let connection = self.retrieve(connection_id)?;
        forward(&connection, target, |connection, path| {
            let filter = regex
                .map(|re| {
                    Regex::new(&format!("^(?:{})$", re))
                        .map_err(|err| FtpError::InvalidArgument(format!("Invalid regex {}: {}", re, err)))
                })
                .transpose()?;
            let (host, port) = (connection.host().to_string(), connection.port());
            let lines = connection.stream_mut()?.list(Some(&path))?;

            Ok(listing::parse_listing(&lines)
                .into_iter()
                .filter(|record| filter.as_ref().map_or(true, |re| re.is_match(&record.name)))
                .map(|record| FileEntry::from_record(&host, port, &path, record))
                .collect())
        })
    }

    /// Opens `target` for download. The connection accepts no other call
    /// until the returned reader is finished or dropped.
    pub fn read(&self, connection_id: &str, target: &str) -> Result<RemoteReader> {
        let connection = self.retrieve(connection_id)?;
        let data = forward(&connection, Some(target), |connection, path| {
            let stream = connection.stream_mut()?;
            stream.transfer_type(FileType::Binary)?;
            let data = stream.get(&path)?;
            connection.begin_transfer();
            Ok(data)
        })?;
        Ok(RemoteReader {
            connection,
            data: Some(data),
        })
    }

    /// Removes `target`: a directory when it ends with `/`, a file otherwise.
    pub fn delete(&self, connection_id: &str, target: &str) -> Result<()> {
        let connection = self.retrieve(connection_id)?;
        forward(&connection, Some(target), |connection, path| {
            let stream = connection.stream_mut()?;
            if path::is_directory(&path) {
                stream.rmdir(&path)
            } else {
                stream.rm(&path)
            }
        })
    }

    fn retrieve(&self, connection_id: &str) -> Result<SharedConnection> {
        if connection_id.trim().is_empty() {
            return Err(FtpError::InvalidArgument(
                "You must send a valid ftp connection id".to_string(),
            ));
        }
        self.registry.lookup(connection_id)
    }
}

/// Runs `action` on the locked connection with `target` resolved to a path.
fn forward<T, F>(connection: &SharedConnection, target: Option<&str>, action: F) -> Result<T>
where
    F: FnOnce(&mut FtpConnection, String) -> Result<T>,
{
    let mut connection = lock_connection(connection);
    connection.ensure_usable()?;
    let path = path::resolve(target, connection.host(), connection.port())?;
    action(&mut *connection, path)
}
