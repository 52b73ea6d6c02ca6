use anyhow::{Context, Result, anyhow, bail};
use livetail_framework::StreamTransport;
use std::io;
use std::net::TcpStream;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

/// path of the gateway's live log stream endpoint
const LOGS_ENDPOINT_PATH: &str = "/api/v1/ws/logs";

/// Resolve the stream endpoint from the gateway's base URL.
///
/// `http(s)` schemes map to `ws(s)` so the stream matches the transport
/// security of the page that configured it; `ws(s)` pass through.
pub fn resolve_endpoint(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).with_context(|| format!("invalid URL {base_url:?}"))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("unsupported scheme {other:?} in {base_url:?}"),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot map scheme of {base_url:?}"))?;
    url.set_path(LOGS_ENDPOINT_PATH);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// websocket stream transport for the gateway log endpoint
///
/// The handshake runs blocking (it happens on the supervisor thread);
/// after it succeeds the TCP stream is switched to non-blocking so
/// `poll_messages` can honor its non-blocking contract.
pub struct WsTransport {
    endpoint: Url,
    socket: Option<WebSocket<MaybeTlsStream<TcpStream>>>,
}

impl WsTransport {
    /// `base_url` is the gateway root, e.g. `https://gateway.example.com`
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            endpoint: resolve_endpoint(base_url)?,
            socket: None,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn set_nonblocking(stream: &mut MaybeTlsStream<TcpStream>) -> Result<()> {
    match stream {
        MaybeTlsStream::Plain(tcp) => tcp.set_nonblocking(true)?,
        MaybeTlsStream::Rustls(tls) => tls.sock.set_nonblocking(true)?,
        _ => bail!("unsupported stream type"),
    }
    Ok(())
}

impl StreamTransport for WsTransport {
    fn connect(&mut self) -> Result<()> {
        let (mut socket, response) = tungstenite::connect(self.endpoint.as_str())
            .with_context(|| format!("websocket handshake with {} failed", self.endpoint))?;
        log::debug!(
            "websocket handshake with {} done (HTTP {})",
            self.endpoint,
            response.status()
        );

        set_nonblocking(socket.get_mut())?;
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut socket) = self.socket.take() {
            // best effort; the peer may already be gone
            let _ = socket.close(None);
            let _ = socket.flush();
        }
        Ok(())
    }

    fn poll_messages(&mut self) -> Result<Vec<String>> {
        let Some(socket) = self.socket.as_mut() else {
            bail!("not connected");
        };

        let mut messages = Vec::new();
        loop {
            match socket.read() {
                Ok(Message::Text(text)) => messages.push(text.to_string()),
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // pong replies are queued by tungstenite and flushed
                    // with the next read
                }
                Ok(Message::Close(frame)) => {
                    self.socket = None;
                    bail!("server closed the stream: {frame:?}");
                }
                Ok(other) => {
                    log::debug!("ignoring non-text frame: {other:?}");
                }
                Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    break;
                }
                Err(e) => {
                    self.socket = None;
                    return Err(e).context("websocket read failed");
                }
            }
        }

        Ok(messages)
    }
}
