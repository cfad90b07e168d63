//! FreeSWITCH Event Socket (ESL) connectivity
//!
//! - [`client`]: the single control connection (auth, commands, events)
//! - [`supervisor`]: reconnection after unexpected disconnects
//! - [`restart`]: detection of FreeSWITCH restarts through `Core-UUID`
//! - [`codec`] / [`message`]: wire framing and parsed frames

use async_trait::async_trait;

use crate::errors::EslResult;

pub mod client;
pub mod codec;
pub mod message;
pub mod restart;
pub mod state;
pub mod supervisor;

pub use client::{ConnectionSignal, EslClient};
pub use message::{EslEvent, EslMessage};
pub use restart::{RestartDetector, RestartSignal};
pub use state::ConnectionState;
pub use supervisor::{Reconnect, ReconnectSupervisor};

/// Anything that can run an API command and hand back the reply
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute_command(&self, command: &str) -> EslResult<EslMessage>;
}

#[async_trait]
impl CommandExecutor for EslClient {
    async fn execute_command(&self, command: &str) -> EslResult<EslMessage> {
        EslClient::execute_command(self, command).await
    }
}
