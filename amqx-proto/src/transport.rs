//! Blocking transport seam.
//!
//! The synchronous driver reads and writes through this trait; socket and
//! TLS implementations live outside this crate. The async driver bypasses
//! it entirely and wraps `tokio::io::AsyncRead + AsyncWrite`. The in-memory
//! pair here backs the protocol tests.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{AmqpError, Result};

/// A connected byte stream with bounded-wait reads.
pub trait Transport: Send {
    /// Read available bytes, waiting at most `timeout`. `Ok(0)` means the
    /// wait elapsed with nothing to read; a closed peer is an error.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write the whole buffer.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Tear the stream down. Further reads and writes fail.
    fn close(&mut self);
}

#[derive(Default)]
struct Pipe {
    data: VecDeque<u8>,
    closed: bool,
}

struct Shared {
    pipe: Mutex<Pipe>,
    readable: Condvar,
}

/// One end of an in-memory duplex stream.
pub struct MemoryTransport {
    incoming: Arc<Shared>,
    outgoing: Arc<Shared>,
}

/// Build a connected in-memory transport pair.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let a = Arc::new(Shared {
        pipe: Mutex::new(Pipe::default()),
        readable: Condvar::new(),
    });
    let b = Arc::new(Shared {
        pipe: Mutex::new(Pipe::default()),
        readable: Condvar::new(),
    });
    (
        MemoryTransport {
            incoming: a.clone(),
            outgoing: b.clone(),
        },
        MemoryTransport {
            incoming: b,
            outgoing: a,
        },
    )
}

impl Transport for MemoryTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut pipe = self
            .incoming
            .pipe
            .lock()
            .map_err(|_| AmqpError::Transport("transport lock poisoned".into()))?;
        if pipe.data.is_empty() && !pipe.closed {
            let (guard, _) = self
                .incoming
                .readable
                .wait_timeout(pipe, timeout)
                .map_err(|_| AmqpError::Transport("transport lock poisoned".into()))?;
            pipe = guard;
        }
        if pipe.data.is_empty() {
            if pipe.closed {
                return Err(AmqpError::Transport("peer closed the stream".into()));
            }
            return Ok(0);
        }
        let mut n = 0;
        while n < buf.len() {
            match pipe.data.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut pipe = self
            .outgoing
            .pipe
            .lock()
            .map_err(|_| AmqpError::Transport("transport lock poisoned".into()))?;
        if pipe.closed {
            return Err(AmqpError::Transport("stream is closed".into()));
        }
        pipe.data.extend(bytes.iter().copied());
        self.outgoing.readable.notify_all();
        Ok(())
    }

    fn close(&mut self) {
        for shared in [&self.incoming, &self.outgoing] {
            if let Ok(mut pipe) = shared.pipe.lock() {
                pipe.closed = true;
            }
            shared.readable.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_carries_bytes_both_ways() {
        let (mut a, mut b) = memory_pair();
        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let n = b.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(&buf[..n], b"ping");

        b.write_all(b"pong").unwrap();
        let n = a.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn read_times_out_empty() {
        let (mut a, _b) = memory_pair();
        let mut buf = [0u8; 4];
        assert_eq!(a.read(&mut buf, Duration::from_millis(1)).unwrap(), 0);
    }

    #[test]
    fn closed_peer_errors() {
        let (mut a, mut b) = memory_pair();
        b.close();
        let mut buf = [0u8; 4];
        assert!(a.read(&mut buf, Duration::from_millis(1)).is_err());
        assert!(a.write_all(b"x").is_err());
    }
}
