//! FTP module.

use std::borrow::Cow;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::offset::TimeZone;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, trace};
use regex::Regex;

use super::data_stream::DataStream;
use super::encoding::ControlEncoding;
use super::status;
use super::types::{DataConnectionMode, FileType, FtpError, Reply, Result, TransferMode};

lazy_static! {
    // This regex extracts IP and Port details from PASV command response.
    // The regex looks for the pattern (h1,h2,h3,h4,p1,p2).
    static ref PORT_RE: Regex = Regex::new(r"\((\d+),(\d+),(\d+),(\d+),(\d+),(\d+)\)").unwrap();

    // This regex extracts modification time from MDTM command response.
    static ref MDTM_RE: Regex = Regex::new(r"\b(\d{14})\b").unwrap();

    // This regex extracts file size from SIZE command response.
    static ref SIZE_RE: Regex = Regex::new(r"^\s*(\d+)\s*$").unwrap();
}

const COPY_BUFFER_SIZE: usize = 8 * 1024;

/// Stream to interface with the FTP server. This interface is only for the command stream.
#[derive(Debug)]
pub struct FtpStream {
    reader: BufReader<DataStream>,
    encoding: ControlEncoding,
    data_mode: DataConnectionMode,
    keep_alive: Option<Duration>,
    welcome: Reply,
}

impl FtpStream {
    /// Creates an FTP Stream.
    ///
    /// Fails with [`FtpError::Unreachable`] when no address accepts the TCP
    /// connection and with [`FtpError::Rejected`] when the server greets with
    /// anything but a positive completion.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<FtpStream> {
        FtpStream::connect_timeout(addr, None)
    }

    /// Creates an FTP Stream, giving up on each resolved address after `timeout`.
    pub fn connect_timeout<A: ToSocketAddrs>(addr: A, timeout: Option<Duration>) -> Result<FtpStream> {
        let addrs = addr.to_socket_addrs().map_err(FtpError::Unreachable)?;
        let mut last_err = None;
        for addr in addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return FtpStream::handshake(stream),
                Err(err) => {
                    trace!("connect to {} failed: {}", addr, err);
                    last_err = Some(err);
                }
            }
        }
        Err(FtpError::Unreachable(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any address")
        })))
    }

    fn handshake(stream: TcpStream) -> Result<FtpStream> {
        let mut ftp_stream = FtpStream {
            reader: BufReader::new(DataStream::new(stream)),
            encoding: ControlEncoding::default(),
            data_mode: DataConnectionMode::default(),
            keep_alive: None,
            welcome: Reply::new(status::READY, ""),
        };
        let mut greeting = ftp_stream.read_reply()?;
        // 120 announces a delay; the real greeting follows.
        while greeting.code == status::READY_MINUTE {
            greeting = ftp_stream.read_reply()?;
        }
        if !greeting.is_positive_completion() {
            if let Err(err) = ftp_stream.shutdown() {
                debug!("could not close refused control connection: {}", err);
            }
            return Err(FtpError::rejected("Could not connect to the ftp server", greeting));
        }
        ftp_stream.welcome = greeting;
        Ok(ftp_stream)
    }

    /// The greeting the server sent when the connection was opened.
    pub fn welcome(&self) -> &Reply {
        &self.welcome
    }

    /// Returns a reference to the underlying TcpStream.
    ///
    /// Example:
    /// ```no_run
    /// use std::time::Duration;
    /// use ftp_bridge::FtpStream;
    ///
    /// let stream = FtpStream::connect("127.0.0.1:21")
    ///                        .expect("Couldn't connect to the server...");
    /// stream.get_ref().set_read_timeout(Some(Duration::from_secs(10)))
    ///                 .expect("set_read_timeout call failed");
    /// ```
    pub fn get_ref(&self) -> &TcpStream {
        self.reader.get_ref().get_ref()
    }

    pub fn control_encoding(&self) -> ControlEncoding {
        self.encoding
    }

    pub fn set_control_encoding(&mut self, encoding: ControlEncoding) {
        self.encoding = encoding;
    }

    pub fn data_connection_mode(&self) -> DataConnectionMode {
        self.data_mode
    }

    /// Selects how data connections are opened for the following transfers.
    pub fn set_data_connection_mode(&mut self, mode: DataConnectionMode) {
        self.data_mode = mode;
    }

    pub fn control_keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }

    /// While `put` copies data, a `NOOP` goes out on the control channel each
    /// time `interval` elapses. This keeps idle-timeout firewalls from dropping
    /// the control connection during long uploads.
    pub fn set_control_keep_alive(&mut self, interval: Option<Duration>) {
        self.keep_alive = interval.filter(|d| !d.is_zero());
    }

    /// Log in to the FTP server.
    pub fn login(&mut self, user: &str, password: &str) -> Result<()> {
        self.write_str(format!("USER {}", user))?;
        let reply = self.read_response_in(&[status::LOGGED_IN, status::NEED_PASSWORD])?;
        if reply.code == status::NEED_PASSWORD {
            self.write_str(format!("PASS {}", password))?;
            self.read_response(status::LOGGED_IN)?;
        }
        Ok(())
    }

    /// Lists the extensions the server advertises. A server without `FEAT`
    /// support yields an empty list.
    pub fn feat(&mut self) -> Result<Vec<String>> {
        self.write_str("FEAT")?;
        let reply = self.read_reply()?;
        if reply.code != status::SYSTEM || reply.lines.len() < 2 {
            return Ok(Vec::new());
        }
        let body = &reply.lines[1..reply.lines.len() - 1];
        Ok(body
            .iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Change the current directory to the path specified.
    pub fn cwd(&mut self, path: &str) -> Result<()> {
        self.write_str(format!("CWD {}", path))?;
        self.read_response(status::REQUESTED_FILE_ACTION_OK).map(|_| ())
    }

    /// Move the current directory to the parent directory.
    pub fn cdup(&mut self) -> Result<()> {
        self.write_str("CDUP")?;
        self.read_response_in(&[status::COMMAND_OK, status::REQUESTED_FILE_ACTION_OK])
            .map(|_| ())
    }

    /// Gets the current directory
    pub fn pwd(&mut self) -> Result<String> {
        self.write_str("PWD")?;
        let reply = self.read_response(status::PATH_CREATED)?;
        let content = reply.last_line();
        match (content.find('"'), content.rfind('"')) {
            (Some(begin), Some(end)) if begin < end => Ok(content[begin + 1..end].to_string()),
            _ => Err(FtpError::InvalidResponse(format!(
                "Invalid PWD Response: {}",
                content
            ))),
        }
    }

    /// This does nothing. This is usually just used to keep the connection open.
    pub fn noop(&mut self) -> Result<()> {
        self.write_str("NOOP")?;
        self.read_response(status::COMMAND_OK).map(|_| ())
    }

    /// This creates a new directory on the server.
    pub fn mkdir(&mut self, pathname: &str) -> Result<()> {
        self.write_str(format!("MKD {}", pathname))?;
        self.read_response(status::PATH_CREATED).map(|_| ())
    }

    /// Runs the PASV command.
    fn pasv(&mut self) -> Result<SocketAddr> {
        self.write_str("PASV")?;
        // PASV response format : 227 Entering Passive Mode (h1,h2,h3,h4,p1,p2).
        let reply = self.read_response(status::PASSIVE_MODE)?;
        let line = reply.last_line();
        let caps = PORT_RE
            .captures(line)
            .ok_or_else(|| FtpError::InvalidResponse(format!("Invalid PASV response: {}", line)))?;
        let mut fields = [0u8; 6];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = caps[i + 1].parse::<u8>().map_err(|_| {
                FtpError::InvalidResponse(format!("Invalid PASV response: {}", line))
            })?;
        }
        let port = (u16::from(fields[4]) << 8) + u16::from(fields[5]);
        let addr = format!("{}.{}.{}.{}:{}", fields[0], fields[1], fields[2], fields[3], port);
        Ok(SocketAddr::from_str(&addr)?)
    }

    /// Opens a local listener next to the control connection and announces it
    /// with `PORT` (IPv4) or `EPRT` (IPv6).
    fn port(&mut self) -> Result<TcpListener> {
        let local = self.get_ref().local_addr()?;
        let listener = TcpListener::bind((local.ip(), 0))?;
        let port = listener.local_addr()?.port();
        let command = match local.ip() {
            IpAddr::V4(ip) => {
                let o = ip.octets();
                format!("PORT {},{},{},{},{},{}", o[0], o[1], o[2], o[3], port >> 8, port & 0xff)
            }
            IpAddr::V6(ip) => format!("EPRT |2|{}|{}|", ip, port),
        };
        self.write_str(command)?;
        self.read_response(status::COMMAND_OK)?;
        Ok(listener)
    }

    /// Execute command which send data back in a separate stream
    fn data_command(&mut self, cmd: &str) -> Result<DataStream> {
        let stream = match self.data_mode {
            DataConnectionMode::Passive => {
                let addr = self.pasv()?;
                self.write_str(cmd)?;
                let stream = TcpStream::connect(addr)?;
                self.read_response_in(status::TRANSFER_STARTING)?;
                stream
            }
            DataConnectionMode::Active => {
                let listener = self.port()?;
                self.write_str(cmd)?;
                self.read_response_in(status::TRANSFER_STARTING)?;
                let (stream, _) = listener.accept()?;
                stream
            }
        };
        Ok(DataStream::new(stream))
    }

    /// Sets the type of file to be transferred. That is the implementation
    /// of `TYPE` command.
    pub fn transfer_type(&mut self, file_type: FileType) -> Result<()> {
        self.write_str(format!("TYPE {}", file_type))?;
        self.read_response(status::COMMAND_OK).map(|_| ())
    }

    /// Sets the transfer mode. That is the implementation of `MODE` command.
    pub fn transfer_mode(&mut self, mode: TransferMode) -> Result<()> {
        self.write_str(format!("MODE {}", mode))?;
        self.read_response(status::COMMAND_OK).map(|_| ())
    }

    /// Quits the current FTP session.
    pub fn quit(&mut self) -> Result<()> {
        self.write_str("QUIT")?;
        self.read_response(status::CLOSING).map(|_| ())
    }

    /// Closes the control connection without saying goodbye.
    pub fn shutdown(&self) -> Result<()> {
        self.reader.get_ref().shutdown()?;
        Ok(())
    }

    /// Retrieves the file name specified from the server.
    /// This method is a more complicated way to retrieve a file.
    /// The reader returned should be read to the end and dropped, after which
    /// `finalize_transfer` reads the server's closing reply.
    pub fn get(&mut self, file_name: &str) -> Result<BufReader<DataStream>> {
        let data_stream = self.data_command(&format!("RETR {}", file_name))?;
        Ok(BufReader::new(data_stream))
    }

    /// Reads the reply that closes a data transfer started by `get` or
    /// `put_with_stream`. Call it only once the data stream has been dropped.
    pub fn finalize_transfer(&mut self) -> Result<Reply> {
        self.finalize_transfer_after(0)
    }

    /// `pending_noops` keep-alive acknowledgements are consumed whether they
    /// arrive before or after the transfer reply, and whatever that reply is.
    fn finalize_transfer_after(&mut self, mut pending_noops: usize) -> Result<Reply> {
        let reply = loop {
            let reply = self.read_reply()?;
            if reply.code == status::COMMAND_OK && pending_noops > 0 {
                pending_noops -= 1;
            } else if !status::is_positive_preliminary(reply.code) {
                break reply;
            }
        };
        let drained = self.drain_noops(pending_noops);

        if status::TRANSFER_COMPLETE.contains(&reply.code) {
            drained?;
            return Ok(reply);
        }
        if let Err(err) = drained {
            debug!("could not read keep-alive replies after {}: {}", reply, err);
        }
        Err(FtpError::UnexpectedReply {
            expected: status::TRANSFER_COMPLETE.to_vec(),
            reply,
        })
    }

    fn drain_noops(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.read_response(status::COMMAND_OK)?;
        }
        Ok(())
    }

    /// Renames the file from_name to to_name
    pub fn rename(&mut self, from_name: &str, to_name: &str) -> Result<()> {
        self.write_str(format!("RNFR {}", from_name))?;
        self.read_response(status::REQUEST_FILE_PENDING)?;
        self.write_str(format!("RNTO {}", to_name))?;
        self.read_response(status::REQUESTED_FILE_ACTION_OK).map(|_| ())
    }

    /// The implementation of `RETR` command where `filename` is the name of the file
    /// to download from FTP and `reader` is the function which operates with the
    /// data stream opened.
    ///
    /// ```no_run
    /// # use ftp_bridge::{FtpStream, FtpError};
    /// # use std::io::Read;
    /// # let mut conn = FtpStream::connect("127.0.0.1:21").unwrap();
    /// let text = conn.retr("retr.txt", |stream| {
    ///     let mut buf = Vec::new();
    ///     stream.read_to_end(&mut buf).map_err(FtpError::ConnectionError)?;
    ///     Ok(buf)
    /// }).unwrap();
    /// assert_eq!(text, b"hello, world!");
    /// ```
    pub fn retr<F, T>(&mut self, filename: &str, reader: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Read) -> Result<T>,
    {
        let res = {
            let mut data_stream = self.get(filename)?;
            reader(&mut data_stream)
        };
        let finalized = self.finalize_transfer();
        settle(res, finalized)
    }

    /// Simple way to retr a file from the server. This stores the file in memory.
    pub fn simple_retr(&mut self, file_name: &str) -> Result<Cursor<Vec<u8>>> {
        self.retr(file_name, |reader| {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
        .map(Cursor::new)
    }

    /// Removes the remote pathname from the server.
    pub fn rmdir(&mut self, pathname: &str) -> Result<()> {
        self.write_str(format!("RMD {}", pathname))?;
        self.read_response(status::REQUESTED_FILE_ACTION_OK).map(|_| ())
    }

    /// Remove the remote file from the server.
    pub fn rm(&mut self, filename: &str) -> Result<()> {
        self.write_str(format!("DELE {}", filename))?;
        self.read_response(status::REQUESTED_FILE_ACTION_OK).map(|_| ())
    }

    /// Send `STOR` and return a writer over the data connection. Write the
    /// file content, drop the writer, then call `finalize_transfer`.
    pub fn put_with_stream(&mut self, filename: &str) -> Result<BufWriter<DataStream>> {
        let stream = self.data_command(&format!("STOR {}", filename))?;
        Ok(BufWriter::new(stream))
    }

    /// This stores a file on the server.
    /// r argument must be any struct which implemenents the Read trait.
    /// A failing `r` still ends the transfer on the control channel before
    /// its error is returned.
    pub fn put<R: Read>(&mut self, filename: &str, r: &mut R) -> Result<()> {
        let mut data_stream = self.put_with_stream(filename)?;
        let mut pending_noops = 0;
        let copied = self
            .copy_with_keep_alive(r, &mut data_stream, &mut pending_noops)
            .and_then(|()| data_stream.flush().map_err(FtpError::from));
        drop(data_stream);
        let finalized = self.finalize_transfer_after(pending_noops).map(|_| ());
        settle(copied, finalized)
    }

    /// Copies `r` into `w`, sending a `NOOP` on the control channel whenever
    /// the keep-alive interval has elapsed. `pending` counts the NOOPs whose
    /// replies are still unread, also when the copy fails.
    fn copy_with_keep_alive<R: Read, W: Write>(&mut self, r: &mut R, w: &mut W, pending: &mut usize) -> Result<()> {
        let mut buffer = [0u8; COPY_BUFFER_SIZE];
        let mut last_noop = Instant::now();
        loop {
            let n = match r.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            w.write_all(&buffer[..n])?;
            if let Some(interval) = self.keep_alive {
                if last_noop.elapsed() >= interval {
                    self.write_str("NOOP")?;
                    *pending += 1;
                    last_noop = Instant::now();
                }
            }
        }
        Ok(())
    }

    /// Execute a command which returns list of strings in a separate stream
    fn list_command(&mut self, cmd: Cow<'static, str>) -> Result<Vec<String>> {
        let mut data = Vec::new();
        let read = {
            let mut data_stream = self.data_command(&cmd)?;
            data_stream.read_to_end(&mut data).map_err(FtpError::from)
        };
        let finalized = self.finalize_transfer();
        settle(read, finalized)?;

        Ok(self
            .encoding
            .decode(&data)
            .lines()
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Execute `LIST` command which returns the detailed file listing in human readable format.
    /// If `pathname` is omited then the list of files in the current directory will be
    /// returned otherwise it will the list of files on `pathname`.
    pub fn list(&mut self, pathname: Option<&str>) -> Result<Vec<String>> {
        let command = pathname.map_or("LIST".into(), |path| format!("LIST {}", path).into());
        self.list_command(command)
    }

    /// Execute `NLST` command which returns the list of file names only.
    /// If `pathname` is omited then the list of files in the current directory will be
    /// returned otherwise it will the list of files on `pathname`.
    pub fn nlst(&mut self, pathname: Option<&str>) -> Result<Vec<String>> {
        let command = pathname.map_or("NLST".into(), |path| format!("NLST {}", path).into());
        self.list_command(command)
    }

    /// Retrieves the modification time of the file at `pathname` if it exists.
    /// In case the file does not exist `None` is returned.
    pub fn mdtm(&mut self, pathname: &str) -> Result<Option<DateTime<Utc>>> {
        self.write_str(format!("MDTM {}", pathname))?;
        let reply = self.read_response(status::FILE)?;

        Ok(MDTM_RE
            .captures(reply.last_line())
            .and_then(|caps| NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M%S").ok())
            .map(|dt| Utc.from_utc_datetime(&dt)))
    }

    /// Retrieves the size of the file in bytes at `pathname` if it exists.
    /// In case the file does not exist `None` is returned.
    pub fn size(&mut self, pathname: &str) -> Result<Option<u64>> {
        self.write_str(format!("SIZE {}", pathname))?;
        let reply = self.read_response(status::FILE)?;

        Ok(SIZE_RE
            .captures(reply.last_line())
            .and_then(|caps| caps[1].parse().ok()))
    }

    fn write_str<S: AsRef<str>>(&mut self, command: S) -> Result<()> {
        let command = command.as_ref();
        if command.starts_with("PASS ") {
            trace!("CMD PASS ******");
        } else {
            trace!("CMD {}", command);
        }

        let mut bytes = self.encoding.encode(command);
        bytes.extend_from_slice(b"\r\n");
        let stream = self.reader.get_mut();
        stream.write_all(&bytes)?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Err(FtpError::ConnectionError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "control connection closed by the server",
            )));
        }
        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }
        let line = self.encoding.decode(&buf);
        trace!("FTP {}", line);
        Ok(line)
    }

    /// Reads one complete reply, whatever its code.
    pub fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line()?;
        let code: u32 = first
            .get(0..3)
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| {
                FtpError::InvalidResponse(format!("could not parse reply code: {}", first))
            })?;

        let mut lines = vec![first.get(4..).unwrap_or("").to_string()];
        // multiple line reply
        // loop until a line begins with the code and a space
        if first.as_bytes().get(3) == Some(&b'-') {
            let prefix = &first[0..3];
            loop {
                let line = self.read_line()?;
                let terminates = line.starts_with(prefix)
                    && matches!(line.as_bytes().get(3), None | Some(&b' '));
                if terminates {
                    lines.push(line.get(4..).unwrap_or("").to_string());
                    break;
                }
                lines.push(line);
            }
        }

        Ok(Reply { code, lines })
    }

    pub fn read_response(&mut self, expected_code: u32) -> Result<Reply> {
        self.read_response_in(&[expected_code])
    }

    /// Retrieve a reply and check its code against `expected_code`.
    pub fn read_response_in(&mut self, expected_code: &[u32]) -> Result<Reply> {
        let reply = self.read_reply()?;
        if expected_code.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(FtpError::UnexpectedReply {
                expected: expected_code.to_vec(),
                reply,
            })
        }
    }
}

/// Combines the outcome of a transfer with the reply that closed it. The
/// transfer's own error wins; a closing failure behind it is only logged.
fn settle<T, U>(transfer: Result<T>, finalized: Result<U>) -> Result<T> {
    match (transfer, finalized) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(_)) => Err(err),
        (Err(err), Err(closing)) => {
            debug!("transfer failed, and so did its closing reply: {}", closing);
            Err(err)
        }
    }
}
