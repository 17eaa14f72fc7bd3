//! Local WebSocket server used by the end-to-end stream tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

use stream_manager::{ConnectionEvent, Exchange, StreamSettings};

/// How long a test waits for a message before failing.
pub const WAIT: Duration = Duration::from_secs(5);

/// What the server does after sending its scripted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Then {
    /// Keep the session open until the client leaves.
    Hold,
    /// Send a close frame.
    Close,
}

/// A single-session scripted server.
pub struct MockServer {
    /// `ws://` URL to connect to.
    pub url: String,
    /// Text frames received from the client, in order.
    pub received: mpsc::UnboundedReceiver<String>,
}

/// Start a server that accepts one client, reads `expect` text frames,
/// sends `frames` and then follows `then`.
pub async fn spawn_server(expect: usize, frames: Vec<String>, then: Then) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, received) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let mut seen = 0;
        while seen < expect {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    seen += 1;
                    let _ = tx.send(text.to_string());
                }
                Some(Ok(_)) => {}
                _ => return,
            }
        }

        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }

        match then {
            Then::Close => {
                let _ = ws.close(None).await;
                while let Some(Ok(_)) = ws.next().await {}
            }
            Then::Hold => while let Some(Ok(_)) = ws.next().await {},
        }
    });

    MockServer { url, received }
}

/// Default settings with one venue pointed at `url`.
pub fn settings_for(exchange: Exchange, url: &str) -> StreamSettings {
    let mut settings = StreamSettings::default();
    settings.exchange_mut(exchange).live_url = url.to_string();
    settings
}

/// Receive the next value or fail after [`WAIT`].
pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Wait for the first `ConnectionLost` event and return its reason.
pub async fn connection_lost(rx: &mut broadcast::Receiver<ConnectionEvent>) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            if let ConnectionEvent::ConnectionLost { reason, .. } = rx.recv().await.unwrap() {
                break reason;
            }
        }
    })
    .await
    .expect("timed out waiting for ConnectionLost")
}
