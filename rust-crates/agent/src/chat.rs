//! Chat events in, chat messages out.

use crate::Result;
use serde::{
    Deserialize,
    Serialize,
};
use std::future::Future;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Guild,
    Direct,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: ChannelKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub id: String,
    pub channel: Channel,
    pub author: Author,
    pub content: String,
    /// Ids of mentioned users, in message order.
    #[serde(default)]
    pub mentions: Vec<String>,
}

impl ChatEvent {
    pub fn is_direct(&self) -> bool {
        self.channel.kind == ChannelKind::Direct
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub content: String,
}

impl OutboundMessage {
    pub fn new(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            content: content.into(),
        }
    }
}

/// Result of offering an event to one stage of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handling {
    /// Not for this stage; try the next one.
    Ignored,
    /// Consumed, with any replies to post.
    Handled(Vec<OutboundMessage>),
}

impl Handling {
    pub fn silent() -> Self {
        Handling::Handled(Vec::new())
    }

    pub fn reply(channel_id: impl Into<String>, content: impl Into<String>) -> Self {
        Handling::Handled(vec![OutboundMessage::new(channel_id, content)])
    }

    pub fn is_handled(&self) -> bool {
        matches!(self, Handling::Handled(_))
    }

    pub fn into_messages(self) -> Vec<OutboundMessage> {
        match self {
            Handling::Ignored => Vec::new(),
            Handling::Handled(messages) => messages,
        }
    }
}

pub trait EventSource {
    /// Next inbound event; `None` once the transport is closed.
    fn next_event(&mut self) -> impl Future<Output = Result<Option<ChatEvent>>>;
}

pub trait ChatSink: Clone + Send + Sync + 'static {
    fn send(&self, message: OutboundMessage) -> impl Future<Output = Result<()>> + Send;
}
