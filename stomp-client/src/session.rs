use crate::dispatch::{panic_message, Dispatcher, Outcome, SessionHandler};
use crate::heartbeat::{HeartbeatAction, HeartbeatTimers};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use stomp_proto::{
    Direction, Frame, FrameCodec, FrameReader, Negotiated, Outbound, ProtocolError, ReaderState,
    Result,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Largest single read from the stream
const READ_CHUNK_SIZE: usize = 4096;

/// Resolves when the server answers the handshake: the negotiated version,
/// or the message of an ERROR frame
pub type Handshake = oneshot::Receiver<std::result::Result<String, String>>;

/// Per-connection settings fixed at connect time
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub heartbeat_ms: u64,
    pub rx_buffer_size: usize,
    pub write_timeout: Duration,
}

/// A live connection: a background receive loop plus a synchronized write
/// path. Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

struct Shared {
    writer: Mutex<WireWriter>,
    heartbeat: Mutex<HeartbeatTimers>,
    version: RwLock<Option<String>>,
    handshake: Mutex<Option<oneshot::Sender<std::result::Result<String, String>>>>,
    close_reason: Mutex<Option<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: CancellationToken,
    dispatcher: Dispatcher,
    write_timeout: Duration,
}

struct WireWriter {
    sink: Box<dyn AsyncWrite + Send + Unpin>,
    codec: FrameCodec,
    scratch: BytesMut,
}

impl WireWriter {
    async fn send(&mut self, item: Outbound<'_>) -> Result<()> {
        self.scratch.clear();
        self.codec.encode(item, &mut self.scratch)?;
        self.sink.write_all(&self.scratch).await?;
        self.sink.flush().await?;
        Ok(())
    }
}

impl Connection {
    /// Splits `stream`, spawns the receive loop and returns the handle plus a
    /// receiver for the handshake result. Nothing is sent yet.
    pub fn start<S>(
        stream: S,
        options: SessionOptions,
        codec: FrameCodec,
        handler: Arc<dyn SessionHandler>,
    ) -> (Connection, Handshake)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (handshake_tx, handshake_rx) = oneshot::channel();

        let reader = FrameReader::new(options.rx_buffer_size, codec.clone());
        let shared = Arc::new(Shared {
            writer: Mutex::new(WireWriter {
                sink: Box::new(write_half),
                codec,
                scratch: BytesMut::with_capacity(1024),
            }),
            heartbeat: Mutex::new(HeartbeatTimers::new(options.heartbeat_ms)),
            version: RwLock::new(None),
            handshake: Mutex::new(Some(handshake_tx)),
            close_reason: Mutex::new(None),
            task: Mutex::new(None),
            closed: CancellationToken::new(),
            dispatcher: Dispatcher::new(handler),
            write_timeout: options.write_timeout,
        });

        let task = tokio::spawn(receive_loop(shared.clone(), read_half, reader));
        // The mutex was just created, so it cannot be contended yet
        if let Ok(mut slot) = shared.task.try_lock() {
            *slot = Some(task);
        }

        (Connection { shared }, handshake_rx)
    }

    /// Serializes and writes one frame followed by its terminator
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        if frame.direction() == Direction::ServerToClient {
            return Err(ProtocolError::InvalidDirection(frame.command().to_string()));
        }
        self.shared.write(Outbound::Frame(frame)).await?;
        debug!("Sent {}", frame);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Waits until the connection has been closed by either side
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    /// Why the receive loop stopped, if it stopped on an error
    pub async fn close_reason(&self) -> Option<String> {
        self.shared.close_reason.lock().await.clone()
    }

    /// Protocol version from the server's CONNECTED frame
    pub async fn version(&self) -> Option<String> {
        self.shared.version.read().await.clone()
    }

    pub async fn heartbeat(&self) -> Option<Negotiated> {
        self.shared.heartbeat.lock().await.negotiated()
    }

    /// Stops the receive loop and releases the stream
    pub async fn close(&self) {
        self.shared.closed.cancel();
        let task = self.shared.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Receive loop ended abnormally: {}", e);
            }
        }
    }
}

impl Shared {
    async fn write(&self, item: Outbound<'_>) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(item).await?;
            self.heartbeat.lock().await.transmitted();
            Ok::<(), ProtocolError>(())
        };

        tokio::select! {
            _ = self.closed.cancelled() => Err(ProtocolError::ConnectionClosed),
            result = timeout(self.write_timeout, write) => match result {
                Ok(result) => result,
                Err(_) => {
                    // A partially written frame leaves the stream unusable
                    self.closed.cancel();
                    Err(ProtocolError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "write timeout",
                    )))
                }
            },
        }
    }

    async fn dispatch(&self, frame: Frame) -> Result<()> {
        match self.dispatcher.dispatch(frame) {
            Outcome::Handled => {}
            Outcome::Reply(reply) => {
                self.write(Outbound::Frame(&reply)).await?;
                debug!("Sent {}", reply);
            }
            Outcome::Connected {
                version,
                heart_beat,
            } => {
                self.heartbeat.lock().await.negotiate(heart_beat);
                *self.version.write().await = Some(version.clone());
                info!("Connected, protocol version {}", version);

                if let Some(tx) = self.handshake.lock().await.take() {
                    let _ = tx.send(Ok(version));
                }
            }
            Outcome::ServerError(message) => {
                if let Some(tx) = self.handshake.lock().await.take() {
                    let _ = tx.send(Err(message));
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&self, reason: Option<ProtocolError>) {
        self.closed.cancel();
        *self.close_reason.lock().await = reason.as_ref().map(|e| e.to_string());
        // Dropping the sender fails a pending handshake
        self.handshake.lock().await.take();

        if let Err(e) = self.writer.lock().await.sink.shutdown().await {
            debug!("Error shutting down stream: {}", e);
        }

        self.dispatcher.handler().on_disconnect(reason.as_ref());
    }
}

async fn receive_loop<R>(shared: Arc<Shared>, mut stream: R, mut reader: FrameReader)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    // Run the loop in its own task so a panic still reaches shutdown
    let inner = tokio::spawn({
        let shared = shared.clone();
        async move { run(&shared, &mut stream, &mut reader).await }
    });

    let result = match inner.await {
        Ok(Ok(())) => Ok(()),
        // A write that raced with a local close
        Ok(Err(ProtocolError::ConnectionClosed)) if shared.closed.is_cancelled() => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            Err(ProtocolError::ReceiveLoopFailed(
                panic_message(&*payload).to_string(),
            ))
        }
        Err(e) => Err(ProtocolError::ReceiveLoopFailed(e.to_string())),
    };

    match &result {
        Ok(()) => info!("Connection closed"),
        Err(e) => error!("Connection terminated: {}", e),
    }

    shared.shutdown(result.err()).await;
}

async fn run<R>(shared: &Shared, stream: &mut R, reader: &mut FrameReader) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut last_tick = Instant::now();

    loop {
        let budget = shared.heartbeat.lock().await.poll_interval();
        let room = reader.available_write().min(chunk.len());

        let read = tokio::select! {
            _ = shared.closed.cancelled() => return Ok(()),
            result = stream.read(&mut chunk[..room]), if room > 0 => Some(result?),
            _ = tokio::time::sleep(budget) => None,
        };

        if let Some(n) = read {
            if n == 0 {
                info!("Server closed the stream");
                return Err(ProtocolError::ConnectionClosed);
            }
            reader.feed(&chunk[..n])?;
            shared.heartbeat.lock().await.received();
        }

        let now = Instant::now();
        let action = shared.heartbeat.lock().await.advance(now - last_tick)?;
        last_tick = now;

        if action == HeartbeatAction::Send {
            trace!("Sending heartbeat");
            shared.write(Outbound::Heartbeat).await?;
        }

        loop {
            match reader.next_frame() {
                Ok(Some(frame)) => shared.dispatch(frame).await?,
                Ok(None) => break,
                Err(e) => warn!("Dropping inbound frame: {}", e),
            }
        }

        if reader.is_exhausted() && reader.state() != ReaderState::Dispatching {
            return Err(ProtocolError::ReceiveBufferExhausted(reader.capacity()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NoopHandler;
    use std::collections::HashSet;
    use stomp_proto::FrameRegistry;
    use tokio::io::{duplex, DuplexStream};

    fn codec() -> FrameCodec {
        FrameCodec::new(Arc::new(FrameRegistry::with_builtins()))
    }

    fn start(stream: DuplexStream) -> Connection {
        let options = SessionOptions {
            heartbeat_ms: 0,
            rx_buffer_size: 1024,
            write_timeout: Duration::from_secs(1),
        };
        let (connection, _handshake) =
            Connection::start(stream, options, codec(), Arc::new(NoopHandler));
        connection
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (client_io, mut broker_io) = duplex(64 * 1024);
        let connection = start(client_io);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let connection = connection.clone();
            tasks.push(tokio::spawn(async move {
                let body = format!("payload-{}-{}", i, "x".repeat(200));
                connection
                    .send_frame(&Frame::send(format!("/queue/{}", i), body))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut reader = FrameReader::new(64 * 1024, codec());
        let mut seen = HashSet::new();
        let mut buf = vec![0u8; 4096];
        while seen.len() < 16 {
            match reader.next_frame().unwrap() {
                Some(frame) => {
                    let destination = frame.destination().unwrap().to_string();
                    let index = destination.trim_start_matches("/queue/");
                    assert!(frame
                        .body_text()
                        .unwrap()
                        .starts_with(&format!("payload-{}-", index)));
                    seen.insert(destination);
                }
                None => {
                    let n = timeout(Duration::from_secs(2), broker_io.read(&mut buf))
                        .await
                        .unwrap()
                        .unwrap();
                    reader.feed(&buf[..n]).unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn test_close_releases_stream() {
        let (client_io, mut broker_io) = duplex(1024);
        let connection = start(client_io);

        connection.close().await;
        assert!(connection.is_closed());
        assert!(connection.close_reason().await.is_none());

        let mut buf = [0u8; 8];
        assert_eq!(broker_io.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(
            connection.send_frame(&Frame::disconnect()).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    struct PanicOnFirstReceipt {
        tx: tokio::sync::mpsc::UnboundedSender<String>,
    }

    impl SessionHandler for PanicOnFirstReceipt {
        fn on_receipt(&self, receipt: &Frame) -> anyhow::Result<()> {
            let id = receipt.receipt_id().unwrap_or_default();
            if id == "r-1" {
                panic!("cannot handle {}", id);
            }
            let _ = self.tx.send(id.to_string());
            Ok(())
        }

        fn on_disconnect(&self, _reason: Option<&ProtocolError>) {
            let _ = self.tx.send("disconnect".to_string());
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_keeps_connection() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (client_io, mut broker_io) = duplex(1024);
        let options = SessionOptions {
            heartbeat_ms: 0,
            rx_buffer_size: 1024,
            write_timeout: Duration::from_secs(1),
        };
        let (connection, _handshake) = Connection::start(
            client_io,
            options,
            codec(),
            Arc::new(PanicOnFirstReceipt { tx }),
        );

        broker_io.write_all(b"RECEIPT\nreceipt-id:r-1\n\n\0").await.unwrap();
        broker_io.write_all(b"RECEIPT\nreceipt-id:r-2\n\n\0").await.unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(event.as_deref(), Some("r-2"));
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn test_huge_heartbeat_from_server_is_survivable() {
        let (client_io, mut broker_io) = duplex(1024);
        let options = SessionOptions {
            heartbeat_ms: 1000,
            rx_buffer_size: 1024,
            write_timeout: Duration::from_secs(1),
        };
        let (connection, handshake) =
            Connection::start(client_io, options, codec(), Arc::new(NoopHandler));

        broker_io
            .write_all(b"CONNECTED\nversion:1.2\nheart-beat:18446744073709551615,0\n\n\0")
            .await
            .unwrap();

        let version = timeout(Duration::from_secs(2), handshake).await.unwrap();
        assert_eq!(version.unwrap(), Ok("1.2".to_string()));
        assert!(!connection.is_closed());
        assert_eq!(connection.heartbeat().await.unwrap().rx_ms, u64::MAX);
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_dropped() {
        let (client_io, mut broker_io) = duplex(1024);
        let connection = start(client_io);

        broker_io.write_all(b"BOGUS\n\n\0").await.unwrap();
        broker_io
            .write_all(b"CONNECTED\nversion:1.1\n\n\0")
            .await
            .unwrap();

        timeout(Duration::from_secs(2), async {
            while connection.version().await.is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(connection.version().await.as_deref(), Some("1.1"));
        assert!(!connection.is_closed());
    }
}
