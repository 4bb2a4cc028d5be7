//! Connection layer
//!
//! Byte streams from X11 clients over TCP and Unix sockets, and the framing
//! step that cuts one request out of a stream.

use crate::error::{ServerError, ServerResult};
use crate::protocol::requests::{read_u16_at, read_u32_at};
use crate::protocol::{ByteOrder, X11Error};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

/// Connection type
pub enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Connection {
    /// Second handle on the same socket, for the writer thread
    pub fn try_clone(&self) -> io::Result<Connection> {
        match self {
            Connection::Tcp(stream) => Ok(Connection::Tcp(stream.try_clone()?)),
            #[cfg(unix)]
            Connection::Unix(stream) => Ok(Connection::Unix(stream.try_clone()?)),
        }
    }

    pub fn shutdown(&self) {
        let _ = match self {
            Connection::Tcp(stream) => stream.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
    }

    pub fn peer(&self) -> String {
        match self {
            Connection::Tcp(stream) => stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp".to_string()),
            #[cfg(unix)]
            Connection::Unix(_) => "unix".to_string(),
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Connection::Unix(stream) => stream.flush(),
        }
    }
}

/// Connection listener
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Create a TCP listener
    pub fn tcp(port: u16) -> io::Result<Self> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(addr)?;
        Ok(Listener::Tcp(listener))
    }

    /// Create a Unix socket listener
    #[cfg(unix)]
    pub fn unix(path: &str) -> io::Result<Self> {
        // Remove a stale socket left by a previous run
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        Ok(Listener::Unix(listener))
    }

    /// Accept a new connection
    pub fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept()?;
                stream.set_nodelay(true)?;
                Ok(Connection::Tcp(stream))
            }
            #[cfg(unix)]
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                Ok(Connection::Unix(stream))
            }
        }
    }
}

/// Read one complete request frame, header included.
///
/// A zero length field without BIG-REQUESTS enabled cannot be framed; the
/// caller answers with a `Length` error and closes the stream.
pub fn read_frame<R: Read>(
    stream: &mut R,
    byte_order: ByteOrder,
    big_requests: bool,
) -> ServerResult<Vec<u8>> {
    let mut frame = vec![0u8; 4];
    stream.read_exact(&mut frame)?;

    let short = read_u16_at(&frame[2..4], byte_order) as usize;
    let total = if short != 0 {
        short * 4
    } else {
        if !big_requests {
            return Err(ServerError::Framing(X11Error::bad_length()));
        }
        let mut ext = [0u8; 4];
        stream.read_exact(&mut ext)?;
        frame.extend_from_slice(&ext);
        let words = read_u32_at(&ext, byte_order) as usize;
        if words < 2 {
            return Err(ServerError::Framing(X11Error::bad_length()));
        }
        words * 4
    };

    let already = frame.len();
    frame.resize(total, 0);
    stream.read_exact(&mut frame[already..])?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_plain_frame() {
        let mut data = Cursor::new(vec![127u8, 0, 1, 0, 8, 0, 2, 0, 1, 2, 3, 4]);
        let frame = read_frame(&mut data, ByteOrder::LSBFirst, false).unwrap();
        assert_eq!(frame, vec![127, 0, 1, 0]);
        let frame = read_frame(&mut data, ByteOrder::LSBFirst, false).unwrap();
        assert_eq!(frame, vec![8, 0, 2, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_read_extended_frame() {
        let mut raw = vec![18u8, 0, 0, 0, 0, 0, 0, 3];
        raw.extend_from_slice(&[0xAA; 4]);
        let frame = read_frame(&mut Cursor::new(raw), ByteOrder::MSBFirst, true).unwrap();
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[8..], &[0xAA; 4]);
    }

    #[test]
    fn test_zero_length_without_big_requests() {
        let mut data = Cursor::new(vec![18u8, 0, 0, 0]);
        assert!(matches!(
            read_frame(&mut data, ByteOrder::LSBFirst, false),
            Err(ServerError::Framing(_))
        ));
    }
}
