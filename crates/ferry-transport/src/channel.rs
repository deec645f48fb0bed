//! # Datagram Channel
//!
//! The engine talks to its peer through a [`Channel`]: a point-to-point,
//! datagram-preserving path that may drop, delay, reorder or duplicate.
//! A timeout is an ordinary result ([`RecvError::Timeout`]), not a failure,
//! and a zero-length read means the peer closed.
//!
//! Two adapters are provided:
//! - [`UdpChannel`] over a connected `std::net::UdpSocket`
//! - [`StreamChannel`] over a `TcpStream`, restoring datagram boundaries
//!   with a 2-byte length prefix per frame

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Outcome of a receive that produced no datagram.
#[derive(Debug, Error)]
pub enum RecvError {
    #[error("timed out waiting for a datagram")]
    Timeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Blocking datagram transport bound to a single peer.
///
/// Callers alternate `send` and `recv_timeout` on one handle; no two receives
/// race on the same channel.
pub trait Channel {
    /// Transmit one datagram.
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` (forever when `None`) for the next datagram,
    /// truncated to `max_len` bytes. `Ok` with an empty buffer means the peer
    /// closed the channel.
    fn recv_timeout(&mut self, max_len: usize, timeout: Option<Duration>)
        -> Result<Bytes, RecvError>;

    /// Signal end-of-stream to the peer.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        (**self).send(datagram)
    }

    fn recv_timeout(
        &mut self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, RecvError> {
        (**self).recv_timeout(max_len, timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// `set_read_timeout` rejects a zero duration.
fn socket_timeout(timeout: Option<Duration>) -> Option<Duration> {
    timeout.map(|t| t.max(Duration::from_micros(1)))
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ─── UDP ────────────────────────────────────────────────────────────────────

/// Zero-length datagrams sent by [`UdpChannel::close`]. UDP may lose any one
/// of them, so the marker is repeated.
const UDP_CLOSE_REPEAT: usize = 3;

/// A connected UDP socket.
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    /// Wrap a socket that is already connected to its peer.
    pub fn new(socket: UdpSocket) -> Self {
        UdpChannel { socket }
    }

    /// Bind `local` and connect to `peer`.
    pub fn connect(local: impl ToSocketAddrs, peer: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        Ok(UdpChannel { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn into_inner(self) -> UdpSocket {
        self.socket
    }
}

impl Channel for UdpChannel {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        match self.socket.send(datagram) {
            Ok(_) => Ok(()),
            // ICMP port-unreachable from an earlier datagram: this one is lost.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn recv_timeout(
        &mut self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, RecvError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buf = vec![0u8; max_len];
        loop {
            let remaining = match deadline {
                Some(deadline) => Some(deadline.saturating_duration_since(Instant::now())),
                None => None,
            };
            self.socket.set_read_timeout(socket_timeout(remaining))?;
            match self.socket.recv(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Bytes::from(buf));
                }
                Err(e) if is_timeout(&e) => return Err(RecvError::Timeout),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    tracing::trace!("ignoring ICMP port-unreachable on UDP channel");
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RecvError::Io(e)),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        for _ in 0..UDP_CLOSE_REPEAT {
            Channel::send(self, &[])?;
        }
        Ok(())
    }
}

// ─── Length-prefixed stream ─────────────────────────────────────────────────

const FRAME_PREFIX_LEN: usize = 2;

/// Datagram framing over a byte stream.
///
/// Each datagram travels as a 2-byte big-endian length followed by its bytes.
/// Partial frames stay in an internal buffer across timeouts, so a timeout
/// never desynchronises the framing.
#[derive(Debug)]
pub struct StreamChannel {
    stream: TcpStream,
    inbound: BytesMut,
    eof: bool,
}

impl StreamChannel {
    pub fn new(stream: TcpStream) -> Self {
        StreamChannel {
            stream,
            inbound: BytesMut::with_capacity(64 * 1024),
            eof: false,
        }
    }

    pub fn connect(peer: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(peer)?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Split a complete frame off the front of the buffer, if one is there.
    fn take_frame(&mut self, max_len: usize) -> Option<Bytes> {
        if self.inbound.len() < FRAME_PREFIX_LEN {
            return None;
        }
        let len = u16::from_be_bytes([self.inbound[0], self.inbound[1]]) as usize;
        if self.inbound.len() < FRAME_PREFIX_LEN + len {
            return None;
        }
        self.inbound.advance(FRAME_PREFIX_LEN);
        let mut frame = self.inbound.split_to(len).freeze();
        frame.truncate(max_len);
        Some(frame)
    }
}

impl Channel for StreamChannel {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let len = u16::try_from(datagram.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} byte datagram exceeds frame limit", datagram.len()),
            )
        })?;
        let mut frame = BytesMut::with_capacity(FRAME_PREFIX_LEN + datagram.len());
        frame.put_u16(len);
        frame.put_slice(datagram);
        self.stream.write_all(&frame)
    }

    fn recv_timeout(
        &mut self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, RecvError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut chunk = [0u8; 16 * 1024];
        loop {
            if let Some(frame) = self.take_frame(max_len) {
                return Ok(frame);
            }
            if self.eof {
                return Ok(Bytes::new());
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(RecvError::Timeout);
                    }
                    Some(left)
                }
                None => None,
            };
            self.stream.set_read_timeout(socket_timeout(remaining))?;
            match self.stream.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Err(RecvError::Timeout),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(RecvError::Io(e)),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Write) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}
