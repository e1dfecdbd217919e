pub mod app;
pub mod bridge;
pub mod chat;
pub mod commands;
pub mod config;
pub mod error;
pub mod extract;
pub mod game;
pub mod gate;
pub mod handler;
pub mod money;
pub mod oracle;
pub mod outbox;
pub mod payout;
pub mod persistence;
pub mod router;
pub mod sniper;
pub mod templates;
pub mod ticket;
pub mod wallet;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::AgentError;

pub type Result<T, E = AgentError> = std::result::Result<T, E>;
