// Plain TCP transport for IRC
// Registers the connection, answers server pings and forwards every other line as a frame

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use super::line::Line;
use super::{ConnectOptions, Transport, TransportEvent, TransportHandle};

type SharedWriter = Arc<TokioMutex<OwnedWriteHalf>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        TcpTransport
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn TransportHandle>> {
        if options.secure {
            return Err(anyhow!("Encrypted connections are not supported"));
        }

        info!("Connecting to {}:{} as {}", options.server, options.port, options.nick);
        let stream = TcpStream::connect((options.server.as_str(), options.port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", options.server, options.port))?;
        let (reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(TokioMutex::new(writer));

        // Ask for extended-join so peers' realnames (capability markers) arrive with JOIN
        write_line(&writer, &Line::cap(&["REQ", "extended-join"])).await?;
        write_line(&writer, &Line::nick(&options.nick)).await?;
        write_line(
            &writer,
            &Line::user(&options.user, &options.hostname, &options.server, &options.realname),
        )
        .await?;
        write_line(&writer, &Line::cap(&["END"])).await?;

        let reader_task = tokio::spawn(read_loop(reader, writer.clone(), events));
        Ok(Arc::new(TcpHandle {
            writer,
            reader_task,
        }))
    }
}

struct TcpHandle {
    writer: SharedWriter,
    reader_task: JoinHandle<()>,
}

#[async_trait]
impl TransportHandle for TcpHandle {
    async fn send(&self, line: Line) -> Result<()> {
        write_line(&self.writer, &line).await
    }

    async fn join(&self, channel: &str) -> Result<()> {
        write_line(&self.writer, &Line::join(channel)).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.reader_task.abort();
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.context("Failed to close IRC connection")?;
        Ok(())
    }
}

impl Drop for TcpHandle {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn write_line(writer: &SharedWriter, line: &Line) -> Result<()> {
    let wire = format!("{}\r\n", line);
    debug!(">> {}", line);
    let mut writer = writer.lock().await;
    writer.write_all(wire.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_loop(
    reader: OwnedReadHalf,
    writer: SharedWriter,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(512);
    let reason = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break None,
            Ok(_) => {
                // Servers relay whatever bytes clients sent; Latin-1 text is common
                let raw = String::from_utf8_lossy(&buf);
                if raw.trim().is_empty() {
                    continue;
                }
                debug!("<< {}", raw.trim_end());
                let line = match Line::parse(&raw) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Dropping unparseable line: {}", e);
                        continue;
                    }
                };
                if line.command == "PING" {
                    let token = line.param(0).unwrap_or_default();
                    if let Err(e) = write_line(&writer, &Line::pong(token)).await {
                        warn!("Failed to answer PING: {}", e);
                    }
                    continue;
                }
                if events.send(TransportEvent::Frame(line)).is_err() {
                    // Nobody is listening anymore
                    return;
                }
            }
            Err(e) => break Some(e.to_string()),
        }
    };

    info!("IRC connection closed{}", reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default());
    let _ = events.send(TransportEvent::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn options(port: u16) -> ConnectOptions {
        ConnectOptions {
            nick: "alice".to_string(),
            user: "alice".to_string(),
            server: "127.0.0.1".to_string(),
            port,
            hostname: "testhost".to_string(),
            realname: "ircsocial/test".to_string(),
            secure: false,
        }
    }

    async fn next_frame(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Line {
        match events.recv().await {
            Some(TransportEvent::Frame(line)) => line,
            other => panic!("Expected a frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_close_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b":bob!b@h PRIVMSG alice :caf\xe9 latin1\r\n").await.unwrap();
            socket.write_all(b":bob!b@h PRIVMSG alice :still here\r\n").await.unwrap();
            socket.flush().await.unwrap();
            socket
        });

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let _handle = TcpTransport::new().connect(options(port), events_tx).await.unwrap();

        let first = next_frame(&mut events).await;
        assert_eq!(first.command, "PRIVMSG");
        assert_eq!(first.param(1), Some("caf\u{FFFD} latin1"));
        let second = next_frame(&mut events).await;
        assert_eq!(second.param(1), Some("still here"));

        drop(server.await.unwrap());
        match events.recv().await {
            Some(TransportEvent::Closed(None)) => (),
            other => panic!("Expected a clean close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_registration_and_ping() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"PING :token123\r\n").await.unwrap();
            let mut received = String::new();
            let mut chunk = [0u8; 512];
            while !received.contains("PONG") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                received.push_str(&String::from_utf8_lossy(&chunk[..n]));
            }
            received
        });

        let (events_tx, _events) = mpsc::unbounded_channel();
        let _handle = TcpTransport::new().connect(options(port), events_tx).await.unwrap();

        let received = server.await.unwrap();
        assert!(received.starts_with("CAP REQ extended-join\r\nNICK alice\r\n"), "{}", received);
        assert!(received.contains("USER alice testhost 127.0.0.1 ircsocial/test\r\nCAP END\r\n"));
        assert!(received.contains("PONG token123\r\n"));
    }
}
