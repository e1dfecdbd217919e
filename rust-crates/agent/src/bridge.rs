//! Line-delimited JSON link to the chat relay process.
//!
//! Inbound frames are `ready` followed by `message`s; outbound frames are
//! `send`. One frame per line.

use crate::{
    AgentError,
    Result,
    chat::{
        ChatEvent,
        ChatSink,
        EventSource,
        OutboundMessage,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{
        AsyncBufReadExt,
        AsyncRead,
        AsyncWrite,
        AsyncWriteExt,
        BufReader,
        Lines,
    },
    sync::Mutex,
};

pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    Ready { user_id: String },
    Message(ChatEvent),
    Send(OutboundMessage),
}

pub struct BridgeEvents<R> {
    lines: Lines<BufReader<R>>,
}

pub struct BridgeSink<W> {
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for BridgeSink<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

pub fn connect<R, W>(reader: R, writer: W) -> (BridgeEvents<R>, BridgeSink<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    (
        BridgeEvents {
            lines: BufReader::new(reader).lines(),
        },
        BridgeSink {
            writer: Arc::new(Mutex::new(writer)),
        },
    )
}

impl<R: AsyncRead + Unpin> BridgeEvents<R> {
    /// Wait for the relay's `ready` frame and return our own user id.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<String> {
        let ready = async {
            loop {
                match self.next_frame().await? {
                    Some(Frame::Ready { user_id }) => return Ok(user_id),
                    Some(_) => {
                        tracing::debug!("ignoring frame received before ready");
                    }
                    None => {
                        return Err(AgentError::ChatTransport(
                            "relay closed before ready".to_string(),
                        ));
                    }
                }
            }
        };
        tokio::time::timeout(timeout, ready).await.map_err(|_| {
            AgentError::ChatTransport(format!(
                "no ready frame within {}s",
                timeout.as_secs()
            ))
        })?
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| AgentError::ChatTransport(format!("relay read failed: {e}")))?;
            let Some(line) = line else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Frame>(&line) {
                Ok(frame) => return Ok(Some(frame)),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed relay frame");
                }
            }
        }
    }
}

impl<R: AsyncRead + Unpin> EventSource for BridgeEvents<R> {
    async fn next_event(&mut self) -> Result<Option<ChatEvent>> {
        loop {
            match self.next_frame().await? {
                Some(Frame::Message(event)) => return Ok(Some(event)),
                Some(Frame::Ready { user_id }) => {
                    tracing::info!(%user_id, "relay reconnected");
                }
                Some(Frame::Send(_)) => {
                    tracing::debug!("ignoring outbound frame on inbound stream");
                }
                None => return Ok(None),
            }
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> ChatSink for BridgeSink<W> {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let mut line = serde_json::to_vec(&Frame::Send(message))
            .map_err(|e| AgentError::ChatTransport(format!("encode failed: {e}")))?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| AgentError::ChatTransport(format!("relay write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| AgentError::ChatTransport(format!("relay flush failed: {e}")))
    }
}
