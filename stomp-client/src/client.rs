use crate::config::ClientConfig;
use crate::dispatch::{NoopHandler, SessionHandler};
use crate::session::{Connection, SessionOptions};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use stomp_proto::{
    Frame, FrameCodec, FrameDescriptor, FrameRegistry, HeartBeat, ProtocolError, Result,
    DEFAULT_RX_BUFFER_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Length of generated subscription ids
const SUBSCRIPTION_ID_LEN: usize = 8;

/// A STOMP client: connection settings, the frame registry, the current
/// connection and its subscriptions
pub struct StompClient {
    login: Option<String>,
    passcode: Option<String>,
    heartbeat_ms: u64,
    rx_buffer_size: usize,
    use_stomp_frame: bool,
    connect_timeout: Duration,
    write_timeout: Duration,
    registry: FrameRegistry,
    handler: Arc<dyn SessionHandler>,
    connection: Option<Connection>,
    /// destination -> subscription id
    subscriptions: HashMap<String, String>,
}

impl StompClient {
    pub fn new(handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            login: None,
            passcode: None,
            heartbeat_ms: 0,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            use_stomp_frame: false,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(30),
            registry: FrameRegistry::with_builtins(),
            handler,
            connection: None,
            subscriptions: HashMap::new(),
        }
    }

    pub fn from_config(config: &ClientConfig, handler: Arc<dyn SessionHandler>) -> Self {
        let mut client = Self::new(handler);
        client.login = config.credentials.login.clone();
        client.passcode = config.credentials.passcode.clone();
        client.heartbeat_ms = config.session.heartbeat_ms;
        client.rx_buffer_size = config.session.rx_buffer_size;
        client.use_stomp_frame = config.client.use_stomp_frame;
        client.connect_timeout = Duration::from_secs(config.timeouts.connect_timeout_secs);
        client.write_timeout = Duration::from_secs(config.timeouts.write_timeout_secs);
        client
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().map_or(false, |c| !c.is_closed())
    }

    /// Declared heartbeat interval in milliseconds
    pub fn heartbeat_timeout(&self) -> u64 {
        self.heartbeat_ms
    }

    pub fn set_heartbeat_timeout(&mut self, interval_ms: u64) -> Result<()> {
        self.ensure_disconnected()?;
        self.heartbeat_ms = interval_ms;
        Ok(())
    }

    pub fn rx_buffer_size(&self) -> usize {
        self.rx_buffer_size
    }

    pub fn set_rx_buffer_size(&mut self, size: usize) -> Result<()> {
        self.ensure_disconnected()?;
        self.rx_buffer_size = size;
        Ok(())
    }

    pub fn set_credentials(&mut self, login: impl Into<String>, passcode: impl Into<String>) {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
    }

    pub fn set_use_stomp_frame(&mut self, enabled: bool) {
        self.use_stomp_frame = enabled;
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) {
        self.connect_timeout = connect_timeout;
    }

    pub fn set_write_timeout(&mut self, write_timeout: Duration) {
        self.write_timeout = write_timeout;
    }

    /// Registers an extension frame type; takes effect on the next connect
    pub fn register_frame(&mut self, descriptor: FrameDescriptor) -> Arc<FrameDescriptor> {
        debug!("Registering frame type {}", descriptor.command());
        self.registry.register(descriptor)
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    /// Opens a session over `stream` and waits for CONNECTED.
    ///
    /// An existing connection is closed first. Returns the protocol version
    /// the server agreed to.
    pub async fn connect<S>(&mut self, stream: S, host: &str) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if let Some(old) = self.connection.take() {
            info!("Replacing existing connection");
            old.close().await;
        }
        self.subscriptions.clear();

        let options = SessionOptions {
            heartbeat_ms: self.heartbeat_ms,
            rx_buffer_size: self.rx_buffer_size,
            write_timeout: self.write_timeout,
        };
        let codec = FrameCodec::new(Arc::new(self.registry.clone()));
        let (connection, handshake) =
            Connection::start(stream, options, codec, self.handler.clone());

        let mut frame = if self.use_stomp_frame {
            Frame::stomp(host)
        } else {
            Frame::connect(host)
        };
        if let Some(login) = &self.login {
            frame = frame.with_header("login", login.as_str());
        }
        if let Some(passcode) = &self.passcode {
            frame = frame.with_header("passcode", passcode.as_str());
        }
        frame = frame.with_header(
            "heart-beat",
            HeartBeat::symmetric(self.heartbeat_ms).to_string(),
        );

        info!("Connecting to {}", host);
        if let Err(e) = connection.send_frame(&frame).await {
            connection.close().await;
            return Err(e);
        }

        let result = match timeout(self.connect_timeout, handshake).await {
            Ok(Ok(Ok(version))) => Ok(version),
            Ok(Ok(Err(message))) => Err(ProtocolError::ServerError(message)),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => Err(ProtocolError::HandshakeTimeout),
        };

        match result {
            Ok(version) => {
                self.connection = Some(connection);
                Ok(version)
            }
            Err(e) => {
                warn!("Handshake failed: {}", e);
                connection.close().await;
                Err(e)
            }
        }
    }

    /// The live connection, for sending from other tasks
    pub fn connection(&self) -> Result<&Connection> {
        match &self.connection {
            Some(connection) if !connection.is_closed() => Ok(connection),
            _ => Err(ProtocolError::NotConnected),
        }
    }

    /// Protocol version negotiated on the current connection
    pub async fn connection_version(&self) -> Option<String> {
        match &self.connection {
            Some(connection) => connection.version().await,
            None => None,
        }
    }

    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.connection()?.send_frame(frame).await
    }

    /// Subscribes to `destination` and returns the subscription id.
    ///
    /// Subscribing to a destination twice returns the existing id without
    /// sending anything.
    pub async fn subscribe(&mut self, destination: &str) -> Result<String> {
        let connection = self.connection()?.clone();

        if let Some(id) = self.subscriptions.get(destination) {
            debug!("Already subscribed to {} as {}", destination, id);
            return Ok(id.clone());
        }

        let id = self.fresh_subscription_id();
        connection
            .send_frame(&Frame::subscribe(destination, id.as_str()))
            .await?;

        info!("Subscribed to {} as {}", destination, id);
        self.subscriptions
            .insert(destination.to_string(), id.clone());
        Ok(id)
    }

    pub async fn unsubscribe(&mut self, id: &str) -> Result<()> {
        let destination = self
            .subscriptions
            .iter()
            .find(|(_, v)| v.as_str() == id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| ProtocolError::NotSubscribed(id.to_string()))?;

        self.connection()?
            .send_frame(&Frame::unsubscribe(id))
            .await?;

        info!("Unsubscribed {} from {}", id, destination);
        self.subscriptions.remove(&destination);
        Ok(())
    }

    /// Subscription id for `destination`, if subscribed
    pub fn subscription(&self, destination: &str) -> Option<&str> {
        self.subscriptions.get(destination).map(String::as_str)
    }

    /// Sends DISCONNECT and closes the connection
    pub async fn disconnect(&mut self) -> Result<()> {
        let connection = self.connection.take().ok_or(ProtocolError::NotConnected)?;
        self.subscriptions.clear();

        let result = if connection.is_closed() {
            Ok(())
        } else {
            connection.send_frame(&Frame::disconnect()).await
        };

        connection.close().await;
        info!("Disconnected");
        result
    }

    fn ensure_disconnected(&self) -> Result<()> {
        if self.is_connected() {
            Err(ProtocolError::AlreadyConnected)
        } else {
            Ok(())
        }
    }

    fn fresh_subscription_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(SUBSCRIPTION_ID_LEN)
                .map(char::from)
                .collect();
            if !self.subscriptions.values().any(|v| *v == id) {
                return id;
            }
        }
    }
}

impl Default for StompClient {
    fn default() -> Self {
        Self::new(Arc::new(NoopHandler))
    }
}
