use chirp_xml::ByteSource;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// The one live connection handle a session owns. Reads go through a
/// cloned [`TcpByteSource`] handed to the codec; writes and shutdown
/// stay here and are only ever driven from the command worker.
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub fn dial(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }

    /// A read handle over the same socket, for the codec. Closing it
    /// shuts the whole connection down.
    pub fn byte_source(&self) -> io::Result<TcpByteSource> {
        Ok(TcpByteSource(self.stream.try_clone()?))
    }

    pub fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = &self.stream;
        stream.write_all(bytes)?;
        stream.flush()
    }

    /// Shut both directions down. Unblocks a read loop parked on the
    /// socket; safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

pub struct TcpByteSource(TcpStream);

impl Read for TcpByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl ByteSource for TcpByteSource {
    fn close_channel(&mut self) -> io::Result<()> {
        self.0.shutdown(Shutdown::Both)
    }
}
