//! Test WebSocket client.
//!
//! Sends [`ClientEvent`]s and asserts on the [`ServerEvent`]s that come
//! back.

use futures_util::{SinkExt, StreamExt};
use huddle_proto::{ClientEvent, ServerEvent};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// A test chat client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

/// How a server-initiated close looked from the client side.
#[derive(Debug)]
pub struct Closed {
    /// `error` frames received before the close.
    pub errors: Vec<String>,
    /// Close frame reason, if one was sent.
    pub reason: Option<String>,
}

impl TestClient {
    /// Connect with a bearer token in the `Authorization` header.
    pub async fn connect(url: &str, token: &str) -> anyhow::Result<Self> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert(AUTHORIZATION, format!("Bearer {token}").parse()?);
        let (ws, _) = connect_async(request).await?;
        Ok(Self { ws })
    }

    /// Connect with the token in the `?token=` query string.
    pub async fn connect_with_query(url: &str, token: &str) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(format!("{url}?token={token}")).await?;
        Ok(Self { ws })
    }

    pub async fn send(&mut self, event: ClientEvent) -> anyhow::Result<()> {
        self.send_raw(&event.to_json()?).await
    }

    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Wait until every frame sent so far has been processed.
    ///
    /// Frames from one connection are handled in order, so the error for an
    /// undecodable frame marks the point the server has reached.
    pub async fn barrier(&mut self) -> anyhow::Result<()> {
        self.send_raw("{}").await?;
        let message = self.expect_error().await?;
        anyhow::ensure!(message.starts_with("Invalid event"), "unexpected error {message}");
        Ok(())
    }

    /// Join a chat and wait until the join has been applied.
    pub async fn join(&mut self, chat_id: &str) -> anyhow::Result<()> {
        self.send(ClientEvent::JoinChat {
            chat_id: chat_id.to_string(),
        })
        .await?;
        self.barrier().await
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> anyhow::Result<ServerEvent> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    /// Receive the next event, skipping control frames.
    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<ServerEvent> {
        loop {
            let frame = timeout(dur, self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for an event"))?;
            match frame {
                Some(Ok(Message::Text(text))) => return Ok(ServerEvent::from_json(&text)?),
                Some(Ok(Message::Close(frame))) => {
                    anyhow::bail!("connection closed: {:?}", frame.map(|f| f.reason.to_string()))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => anyhow::bail!("connection closed"),
            }
        }
    }

    /// Receive until an event with the given wire name arrives.
    pub async fn expect_event(&mut self, name: &str) -> anyhow::Result<ServerEvent> {
        loop {
            let event = self.recv().await?;
            if event.name() == name {
                return Ok(event);
            }
        }
    }

    /// Receive until an `error` event arrives and return its message.
    pub async fn expect_error(&mut self) -> anyhow::Result<String> {
        match self.expect_event("error").await? {
            ServerEvent::Error { message } => Ok(message),
            other => anyhow::bail!("unexpected {other:?}"),
        }
    }

    /// Assert that no event with this name arrives within `dur`.
    pub async fn expect_no_event(&mut self, name: &str, dur: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + dur;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return Ok(());
            }
            match self.recv_timeout(left).await {
                Ok(event) if event.name() == name => {
                    anyhow::bail!("unexpected {name}: {event:?}")
                }
                Ok(_) => continue,
                Err(_) => return Ok(()),
            }
        }
    }

    /// Read until the server closes the connection.
    pub async fn expect_closed(&mut self) -> anyhow::Result<Closed> {
        let mut errors = Vec::new();
        loop {
            let frame = timeout(Duration::from_secs(5), self.ws.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for close"))?;
            match frame {
                Some(Ok(Message::Text(text))) => {
                    if let ServerEvent::Error { message } = ServerEvent::from_json(&text)? {
                        errors.push(message);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Closed {
                        errors,
                        reason: frame.map(|f| f.reason.to_string()),
                    });
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return Ok(Closed { errors, reason: None }),
            }
        }
    }

    /// Close from the client side.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        // Drain until the server acknowledges.
        while let Ok(Some(Ok(_))) = timeout(Duration::from_secs(2), self.ws.next()).await {}
        Ok(())
    }
}
