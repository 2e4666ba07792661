use std::{
    io::{Read, Result, Write},
    net::{Shutdown, TcpStream},
};

/// Data Stream used for communications
#[derive(Debug)]
pub struct DataStream {
    stream: TcpStream,
}

impl DataStream {
    pub fn new(stream: TcpStream) -> DataStream {
        DataStream { stream }
    }

    /// Returns a reference to the underlying TcpStream.
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    /// Closes both directions of the socket.
    pub fn shutdown(&self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

impl Read for DataStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for DataStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()
    }
}
