use std::sync::Arc;
use stomp_client::{ClientConfig, MessageAck, SessionHandler, StompClient};
use stomp_proto::{Frame, ProtocolError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Prints inbound traffic to the console
struct ConsoleHandler;

impl SessionHandler for ConsoleHandler {
    fn on_message(&self, message: &Frame) -> anyhow::Result<MessageAck> {
        println!(
            "\n[MESSAGE {}] {}",
            message.destination().unwrap_or("?"),
            message.body_text().unwrap_or("<binary>")
        );
        Ok(MessageAck::Ack)
    }

    fn on_receipt(&self, receipt: &Frame) -> anyhow::Result<()> {
        println!("\n[RECEIPT] {}", receipt.receipt_id().unwrap_or("?"));
        Ok(())
    }

    fn on_error(&self, error: &Frame) -> anyhow::Result<()> {
        println!(
            "\n[ERROR] {}",
            error
                .header("message")
                .or_else(|| error.body_text())
                .unwrap_or("?")
        );
        Ok(())
    }

    fn on_frame(&self, frame: &Frame) -> anyhow::Result<()> {
        println!("\n[{}]", frame);
        Ok(())
    }

    fn on_disconnect(&self, reason: Option<&ProtocolError>) {
        match reason {
            Some(e) => println!("\n[DISCONNECTED] {}", e),
            None => println!("\n[DISCONNECTED]"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    init_logging(&config);

    info!("STOMP Client v{}", env!("CARGO_PKG_VERSION"));

    let broker_addr = config.broker_endpoint();
    info!("Connecting to broker at {}...", broker_addr);

    let stream = match tokio::time::timeout(
        Duration::from_secs(config.timeouts.connect_timeout_secs),
        TcpStream::connect(&broker_addr),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            error!("Failed to connect: {}", e);
            return Err(e.into());
        }
        Err(_) => {
            error!("Connection timeout");
            return Err(anyhow::anyhow!("Connection timeout"));
        }
    };
    stream.set_nodelay(true)?;

    let mut client = StompClient::from_config(&config, Arc::new(ConsoleHandler));
    let version = client.connect(stream, config.virtual_host()).await?;

    info!("Session established");
    println!("\nConnected to {} (STOMP {}).", broker_addr, version);
    println!("Available commands: SUB <dest>, UNSUB <id>, SEND <dest> <text>, quit");
    println!("Type a command and press Enter:\n");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush()?;

        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }

        let input = line.trim();

        if input.is_empty() {
            continue;
        }

        if input == "quit" || input == "exit" {
            info!("Exiting...");
            break;
        }

        if !client.is_connected() {
            println!("[ERROR] Connection lost");
            break;
        }

        let mut parts = input.splitn(3, ' ');
        let cmd = parts.next().unwrap_or_default().to_uppercase();
        let arg = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();

        let result = match cmd.as_str() {
            "SUB" if !arg.is_empty() => client
                .subscribe(arg)
                .await
                .map(|id| println!("[OK] Subscribed as {}", id)),
            "UNSUB" if !arg.is_empty() => client
                .unsubscribe(arg)
                .await
                .map(|()| println!("[OK] Unsubscribed")),
            "SEND" if !arg.is_empty() => client
                .send_frame(&Frame::send(arg, rest))
                .await
                .map(|()| println!("[OK] Sent")),
            _ => {
                println!("Unknown command or missing argument: {}", input);
                continue;
            }
        };

        if let Err(e) = result {
            warn!("Command failed: {}", e);
            println!("[ERROR] {}", e);
        }
    }

    if client.is_connected() {
        client.disconnect().await?;
    }

    Ok(())
}

fn load_config() -> ClientConfig {
    // Logging is not initialised yet, so report on stderr
    if let Ok(config) = ClientConfig::from_file("configs/client.toml") {
        eprintln!("Loaded config from configs/client.toml");
        return config;
    }

    if let Ok(config) = ClientConfig::from_file("client.toml") {
        eprintln!("Loaded config from client.toml");
        return config;
    }

    eprintln!("No config file found, using default configuration");
    ClientConfig::default_config()
}

fn init_logging(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level));

    if config.logging.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
