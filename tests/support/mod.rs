//! A small in-process FTP server backed by an in-memory file tree.
//!
//! It speaks just enough RFC 959 for the client: login, FEAT, TYPE/MODE,
//! PASV/PORT data connections, STOR/RETR/LIST/NLST, DELE/RMD/MKD, CWD/PWD,
//! RNFR/RNTO, SIZE/MDTM, NOOP and QUIT. Every command line is recorded.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

#[derive(Debug, Clone)]
pub struct MockOptions {
    pub greeting: String,
    pub password: String,
    pub utf8: bool,
    /// Replaces the `226` that ends a successful `STOR`; the upload is then discarded.
    pub store_reply: Option<String>,
}

impl Default for MockOptions {
    fn default() -> Self {
        MockOptions {
            greeting: "220 mock ftp ready".to_string(),
            password: "secret".to_string(),
            utf8: true,
            store_reply: None,
        }
    }
}

#[derive(Debug)]
struct Tree {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    commands: Vec<String>,
}

pub struct MockServer {
    addr: SocketAddr,
    tree: Arc<Mutex<Tree>>,
}

impl MockServer {
    pub fn start() -> MockServer {
        MockServer::with_options(MockOptions::default())
    }

    pub fn with_options(options: MockOptions) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        let tree = Arc::new(Mutex::new(Tree {
            files: BTreeMap::new(),
            dirs,
            commands: Vec::new(),
        }));

        let shared = Arc::clone(&tree);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let tree = Arc::clone(&shared);
                let options = options.clone();
                thread::spawn(move || {
                    if let Ok(session) = Session::new(stream, tree, options) {
                        let _ = session.run();
                    }
                });
            }
        });

        MockServer { addr, tree }
    }

    pub fn host(&self) -> &'static str {
        "127.0.0.1"
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn put_file(&self, path: &str, content: &[u8]) {
        let mut tree = self.lock();
        add_parents(&mut tree.dirs, path);
        tree.files.insert(path.to_string(), content.to_vec());
    }

    pub fn add_dir(&self, path: &str) {
        let mut tree = self.lock();
        add_parents(&mut tree.dirs, path);
        tree.dirs.insert(path.to_string());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// How many recorded commands start with `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.split(' ').next() == Some(verb))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap()
    }
}

fn normalize(path: &str) -> String {
    let mut out = String::from("/");
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(i) => path[..i].to_string(),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn add_parents(dirs: &mut BTreeSet<String>, path: &str) {
    let mut current = parent(path);
    loop {
        dirs.insert(current.clone());
        if current == "/" {
            break;
        }
        current = parent(&current);
    }
}

enum DataChannel {
    Passive(TcpListener),
    Active(SocketAddr),
}

struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    tree: Arc<Mutex<Tree>>,
    options: MockOptions,
    data: Option<DataChannel>,
    cwd: String,
    rename_from: Option<String>,
}

impl Session {
    fn new(stream: TcpStream, tree: Arc<Mutex<Tree>>, options: MockOptions) -> io::Result<Session> {
        Ok(Session {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            tree,
            options,
            data: None,
            cwd: "/".to_string(),
            rename_from: None,
        })
    }

    fn reply(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(format!("{}\r\n", line).as_bytes())
    }

    fn resolve(&self, arg: &str) -> String {
        if arg.starts_with('/') {
            normalize(arg)
        } else {
            normalize(&format!("{}/{}", self.cwd, arg))
        }
    }

    fn open_data(&mut self) -> io::Result<TcpStream> {
        match self.data.take() {
            Some(DataChannel::Passive(listener)) => listener.accept().map(|(stream, _)| stream),
            Some(DataChannel::Active(addr)) => TcpStream::connect(addr),
            None => Err(io::Error::new(io::ErrorKind::Other, "no data connection")),
        }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap()
    }

    fn run(mut self) -> io::Result<()> {
        let greeting = self.options.greeting.clone();
        self.reply(&greeting)?;
        if !greeting.starts_with('2') {
            return Ok(());
        }

        loop {
            let mut raw = String::new();
            if self.reader.read_line(&mut raw)? == 0 {
                return Ok(());
            }
            let line = raw.trim_end_matches(|c| c == '\r' || c == '\n').to_string();
            self.tree().commands.push(line.clone());
            let (verb, arg) = match line.split_once(' ') {
                Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.to_string()),
                None => (line.to_ascii_uppercase(), String::new()),
            };

            match verb.as_str() {
                "USER" => self.reply("331 Password required")?,
                "PASS" => {
                    if arg == self.options.password {
                        self.reply("230 Logged in")?
                    } else {
                        self.reply("530 Login incorrect")?
                    }
                }
                "FEAT" => {
                    if self.options.utf8 {
                        self.reply("211-Features:")?;
                        self.reply(" SIZE")?;
                        self.reply(" UTF8")?;
                        self.reply("211 End")?
                    } else {
                        self.reply("211 No features")?
                    }
                }
                "TYPE" | "NOOP" => self.reply("200 Command okay")?,
                "MODE" => {
                    if arg == "S" {
                        self.reply("200 Mode set to S")?
                    } else {
                        self.reply("504 Only stream mode")?
                    }
                }
                "PASV" => {
                    let listener = TcpListener::bind("127.0.0.1:0")?;
                    let port = listener.local_addr()?.port();
                    self.data = Some(DataChannel::Passive(listener));
                    self.reply(&format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{}).",
                        port >> 8,
                        port & 0xff
                    ))?
                }
                "PORT" => {
                    let n: Vec<u16> = arg.split(',').filter_map(|p| p.trim().parse().ok()).collect();
                    if n.len() == 6 {
                        let addr = format!("{}.{}.{}.{}:{}", n[0], n[1], n[2], n[3], (n[4] << 8) + n[5]);
                        match addr.parse() {
                            Ok(addr) => {
                                self.data = Some(DataChannel::Active(addr));
                                self.reply("200 PORT command successful")?
                            }
                            Err(_) => self.reply("501 Bad PORT address")?,
                        }
                    } else {
                        self.reply("501 Bad PORT address")?
                    }
                }
                "STOR" => {
                    let path = self.resolve(&arg);
                    self.reply("150 Ok to send data")?;
                    let mut data = self.open_data()?;
                    let mut content = Vec::new();
                    data.read_to_end(&mut content)?;
                    drop(data);
                    match self.options.store_reply.clone() {
                        Some(refusal) => self.reply(&refusal)?,
                        None => {
                            {
                                let mut tree = self.tree();
                                add_parents(&mut tree.dirs, &path);
                                tree.files.insert(path, content);
                            }
                            self.reply("226 Transfer complete")?
                        }
                    }
                }
                "RETR" => {
                    let path = self.resolve(&arg);
                    let content = self.tree().files.get(&path).cloned();
                    match content {
                        None => self.reply("550 No such file")?,
                        Some(content) => {
                            self.reply("150 Opening data connection")?;
                            let mut data = self.open_data()?;
                            data.write_all(&content)?;
                            drop(data);
                            self.reply("226 Transfer complete")?
                        }
                    }
                }
                "LIST" | "NLST" => {
                    let dir = self.resolve(&arg);
                    let listing = {
                        let tree = self.tree();
                        if tree.dirs.contains(&dir) {
                            Some(render_listing(&tree, &dir, verb == "LIST"))
                        } else {
                            None
                        }
                    };
                    match listing {
                        None => self.reply("550 No such directory")?,
                        Some(listing) => {
                            self.reply("150 Here comes the directory listing")?;
                            let mut data = self.open_data()?;
                            data.write_all(listing.as_bytes())?;
                            drop(data);
                            self.reply("226 Directory send OK")?
                        }
                    }
                }
                "DELE" => {
                    let path = self.resolve(&arg);
                    let removed = self.tree().files.remove(&path).is_some();
                    if removed {
                        self.reply("250 File deleted")?
                    } else {
                        self.reply("550 No such file")?
                    }
                }
                "RMD" => {
                    let path = self.resolve(&arg);
                    let removed = {
                        let mut tree = self.tree();
                        let occupied = tree.files.keys().any(|f| parent(f) == path)
                            || tree.dirs.iter().any(|d| d != &path && parent(d) == path);
                        !occupied && path != "/" && tree.dirs.remove(&path)
                    };
                    if removed {
                        self.reply("250 Directory removed")?
                    } else {
                        self.reply("550 Remove directory operation failed")?
                    }
                }
                "MKD" => {
                    let path = self.resolve(&arg);
                    {
                        let mut tree = self.tree();
                        add_parents(&mut tree.dirs, &path);
                        tree.dirs.insert(path.clone());
                    }
                    self.reply(&format!("257 \"{}\" created", path))?
                }
                "CWD" => {
                    let path = self.resolve(&arg);
                    let exists = self.tree().dirs.contains(&path);
                    if exists {
                        self.cwd = path;
                        self.reply("250 Directory changed")?
                    } else {
                        self.reply("550 No such directory")?
                    }
                }
                "CDUP" => {
                    self.cwd = parent(&self.cwd);
                    self.reply("250 Directory changed")?
                }
                "PWD" => {
                    let cwd = self.cwd.clone();
                    self.reply(&format!("257 \"{}\" is the current directory", cwd))?
                }
                "RNFR" => {
                    let path = self.resolve(&arg);
                    let exists = self.tree().files.contains_key(&path);
                    if exists {
                        self.rename_from = Some(path);
                        self.reply("350 Ready for RNTO")?
                    } else {
                        self.reply("550 No such file")?
                    }
                }
                "RNTO" => {
                    let to = self.resolve(&arg);
                    match self.rename_from.take() {
                        Some(from) => {
                            {
                                let mut tree = self.tree();
                                if let Some(content) = tree.files.remove(&from) {
                                    tree.files.insert(to, content);
                                }
                            }
                            self.reply("250 Rename successful")?
                        }
                        None => self.reply("503 RNFR required first")?,
                    }
                }
                "SIZE" => {
                    let path = self.resolve(&arg);
                    let size = self.tree().files.get(&path).map(Vec::len);
                    match size {
                        Some(size) => self.reply(&format!("213 {}", size))?,
                        None => self.reply("550 No such file")?,
                    }
                }
                "MDTM" => {
                    let path = self.resolve(&arg);
                    let exists = self.tree().files.contains_key(&path);
                    if exists {
                        self.reply("213 20240115103000")?
                    } else {
                        self.reply("550 No such file")?
                    }
                }
                "QUIT" => {
                    self.reply("221 Goodbye")?;
                    return Ok(());
                }
                _ => self.reply("502 Command not implemented")?,
            }
        }
    }
}

fn render_listing(tree: &Tree, dir: &str, long: bool) -> String {
    let mut lines = Vec::new();
    for sub in tree.dirs.iter().filter(|d| d.as_str() != dir && parent(d) == dir) {
        if long {
            lines.push(format!(
                "drwxr-xr-x    2 ftp      ftp          4096 Jan 15  2024 {}",
                base_name(sub)
            ));
        } else {
            lines.push(base_name(sub).to_string());
        }
    }
    for (path, content) in tree.files.iter().filter(|(f, _)| parent(f) == dir) {
        if long {
            lines.push(format!(
                "-rw-r--r--    1 ftp      ftp      {:>8} Jan 15  2024 {}",
                content.len(),
                base_name(path)
            ));
        } else {
            lines.push(base_name(path).to_string());
        }
    }
    let mut out = lines.join("\r\n");
    if !out.is_empty() {
        out.push_str("\r\n");
    }
    out
}
