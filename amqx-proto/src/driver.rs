//! Work-loop drivers over the sans-I/O connection core.
//!
//! The synchronous driver pairs the connection with a blocking
//! [`Transport`]; the async driver wraps any tokio byte stream. Both run
//! the same iteration: flush pending output, read with a bounded wait,
//! feed the decoder, evaluate timers, flush again. A mutex serializes
//! iterations so callers on several threads cannot interleave half a
//! cycle.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::connection::Connection;
use crate::error::{AmqpError, Result};
use crate::event::Event;
use crate::transport::Transport;

const READ_CHUNK: usize = 64 * 1024;

/// Blocking driver.
pub struct Driver<T: Transport> {
    core: Mutex<Core<T>>,
}

struct Core<T> {
    connection: Connection,
    transport: T,
    read_buf: Vec<u8>,
    write_buf: BytesMut,
}

impl<T: Transport> Driver<T> {
    pub fn new(connection: Connection, transport: T) -> Driver<T> {
        Driver {
            core: Mutex::new(Core {
                connection,
                transport,
                read_buf: vec![0; READ_CHUNK],
                write_buf: BytesMut::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Core<T>>> {
        self.core
            .lock()
            .map_err(|_| AmqpError::Transport("driver lock poisoned".into()))
    }

    /// One serialized work iteration. Returns the events it surfaced.
    pub fn do_work(&self, timeout: Duration) -> Result<Vec<Event>> {
        self.lock()?.iterate(timeout)
    }

    /// Run connection API calls under the driver lock, flushing whatever
    /// frames they queued before returning.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> Result<R> {
        let mut core = self.lock()?;
        let out = f(&mut core.connection);
        core.flush()?;
        Ok(out)
    }
}

impl<T: Transport> Core<T> {
    fn flush(&mut self) -> Result<()> {
        let now = Instant::now();
        self.write_buf.clear();
        let n = self.connection.poll_transmit(&mut self.write_buf, now);
        if n > 0 {
            trace!(bytes = n, "flush");
            if let Err(err) = self.transport.write_all(&self.write_buf) {
                self.connection.transport_failed("write failed");
                return Err(err);
            }
        }
        Ok(())
    }

    fn iterate(&mut self, timeout: Duration) -> Result<Vec<Event>> {
        self.flush()?;
        match self.transport.read(&mut self.read_buf, timeout) {
            Ok(0) => {}
            Ok(n) => {
                let now = Instant::now();
                if let Err(err) = self.connection.feed(&self.read_buf[..n], now) {
                    // Push out whatever close frame the failure queued.
                    let _ = self.flush();
                    return Err(err);
                }
            }
            Err(err) => {
                self.connection.transport_failed("read failed");
                return Err(err);
            }
        }
        let now = Instant::now();
        if self.connection.next_timeout(now).is_some_and(|d| now >= d) {
            let timer_result = self.connection.handle_timeout(now);
            self.flush()?;
            timer_result?;
        }
        self.flush()?;
        let mut events = Vec::new();
        while let Some(event) = self.connection.poll_event() {
            events.push(event);
        }
        Ok(events)
    }
}

/// Async driver over a tokio byte stream. Same iteration shape as the
/// blocking driver, no duplicated state machine.
pub struct AsyncDriver<S> {
    core: tokio::sync::Mutex<AsyncCore<S>>,
}

struct AsyncCore<S> {
    connection: Connection,
    stream: S,
    read_buf: Vec<u8>,
    write_buf: BytesMut,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncDriver<S> {
    pub fn new(connection: Connection, stream: S) -> AsyncDriver<S> {
        AsyncDriver {
            core: tokio::sync::Mutex::new(AsyncCore {
                connection,
                stream,
                read_buf: vec![0; READ_CHUNK],
                write_buf: BytesMut::new(),
            }),
        }
    }

    pub async fn do_work(&self, timeout: Duration) -> Result<Vec<Event>> {
        self.core.lock().await.iterate(timeout).await
    }

    pub async fn with_connection<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> Result<R> {
        let mut core = self.core.lock().await;
        let out = f(&mut core.connection);
        core.flush().await?;
        Ok(out)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> AsyncCore<S> {
    async fn flush(&mut self) -> Result<()> {
        let now = Instant::now();
        self.write_buf.clear();
        let n = self.connection.poll_transmit(&mut self.write_buf, now);
        if n > 0 {
            if let Err(err) = self.stream.write_all(&self.write_buf).await {
                self.connection.transport_failed("write failed");
                return Err(AmqpError::Transport(err.to_string()));
            }
        }
        Ok(())
    }

    async fn iterate(&mut self, timeout: Duration) -> Result<Vec<Event>> {
        self.flush().await?;
        match tokio::time::timeout(timeout, self.stream.read(&mut self.read_buf)).await {
            Err(_) => {}
            Ok(Ok(0)) => {
                self.connection.transport_failed("peer closed the stream");
                return Err(AmqpError::Transport("peer closed the stream".into()));
            }
            Ok(Ok(n)) => {
                let now = Instant::now();
                if let Err(err) = self.connection.feed(&self.read_buf[..n], now) {
                    let _ = self.flush().await;
                    return Err(err);
                }
            }
            Ok(Err(err)) => {
                self.connection.transport_failed("read failed");
                return Err(AmqpError::Transport(err.to_string()));
            }
        }
        let now = Instant::now();
        if self.connection.next_timeout(now).is_some_and(|d| now >= d) {
            let timer_result = self.connection.handle_timeout(now);
            self.flush().await?;
            timer_result?;
        }
        self.flush().await?;
        let mut events = Vec::new();
        while let Some(event) = self.connection.poll_event() {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::transport::memory_pair;

    /// A connection that never called open() acts as the listening side.
    fn passive() -> Connection {
        Connection::new(ConnectionConfig::default())
    }

    #[test]
    fn blocking_drivers_handshake_over_memory_pair() {
        let (client_io, server_io) = memory_pair();
        let mut client_conn = Connection::new(ConnectionConfig::default());
        client_conn.open(Instant::now()).unwrap();
        let client = Driver::new(client_conn, client_io);
        let server = Driver::new(passive(), server_io);

        let peer = std::thread::spawn(move || {
            for _ in 0..50 {
                let events = server.do_work(Duration::from_millis(10)).unwrap_or_default();
                if events.contains(&Event::Opened) {
                    return true;
                }
            }
            false
        });

        let mut opened = false;
        for _ in 0..50 {
            let events = client.do_work(Duration::from_millis(10)).unwrap();
            if events.contains(&Event::Opened) {
                opened = true;
                break;
            }
        }
        assert!(opened, "client reached Opened");
        assert!(peer.join().unwrap(), "server reached Opened");
    }

    #[tokio::test]
    async fn async_drivers_handshake_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let mut client_conn = Connection::new(ConnectionConfig::default());
        client_conn.open(Instant::now()).unwrap();
        let client = AsyncDriver::new(client_conn, client_io);
        let server = AsyncDriver::new(passive(), server_io);

        let peer = tokio::spawn(async move {
            for _ in 0..50 {
                let events = server
                    .do_work(Duration::from_millis(10))
                    .await
                    .unwrap_or_default();
                if events.contains(&Event::Opened) {
                    return true;
                }
            }
            false
        });

        let mut opened = false;
        for _ in 0..50 {
            let events = client.do_work(Duration::from_millis(10)).await.unwrap();
            if events.contains(&Event::Opened) {
                opened = true;
                break;
            }
        }
        assert!(opened, "client reached Opened");
        assert!(peer.await.unwrap(), "server reached Opened");
    }
}
