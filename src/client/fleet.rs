//! A fleet of independent reconnecting clients.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::reconnect::{Inbound, ReconnectingClient};
use crate::client::state::{ClientState, ClientStatus};
use crate::client::ClientError;
use crate::config::{parse_ws_target, ClientConfig};
use crate::net::Dialer;

/// Runs `connections` clients with ids `1..=connections` against one target.
pub struct Fleet {
    tasks: JoinSet<()>,
    statuses: Vec<watch::Receiver<ClientStatus>>,
}

impl Fleet {
    /// Parse `config.target` and spawn the configured number of clients.
    pub fn from_config(
        config: &ClientConfig,
        dialer: Arc<dyn Dialer>,
        cancel: CancellationToken,
    ) -> Result<Self, ClientError> {
        if config.connections == 0 {
            return Err(ClientError::NoConnections);
        }
        let target = parse_ws_target(&config.target)?;
        Ok(Self::spawn(&target, config, dialer, cancel))
    }

    /// Spawn every client. They share the dialer and the cancellation token
    /// but nothing else.
    pub fn spawn(
        target: &Url,
        config: &ClientConfig,
        dialer: Arc<dyn Dialer>,
        cancel: CancellationToken,
    ) -> Self {
        Self::spawn_with(target, config, dialer, cancel, None)
    }

    /// Like [`Fleet::spawn`], forwarding every received payload to `inbound`.
    pub fn spawn_with(
        target: &Url,
        config: &ClientConfig,
        dialer: Arc<dyn Dialer>,
        cancel: CancellationToken,
        inbound: Option<mpsc::Sender<Inbound>>,
    ) -> Self {
        let mut tasks = JoinSet::new();
        let mut statuses = Vec::with_capacity(config.connections);

        for id in 1..=config.connections {
            let mut client =
                ReconnectingClient::new(id, target.clone(), config, dialer.clone(), cancel.clone());
            if let Some(tx) = &inbound {
                client = client.with_inbound(tx.clone());
            }
            statuses.push(client.status());
            tasks.spawn(client.run());
        }

        tracing::info!(connections = config.connections, target = %target, "Fleet started");
        Self { tasks, statuses }
    }

    /// Status receivers, indexed by `client_id - 1`.
    pub fn statuses(&self) -> &[watch::Receiver<ClientStatus>] {
        &self.statuses
    }

    /// Clients currently in the `Connected` state.
    pub fn connected_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|rx| rx.borrow().state == ClientState::Connected)
            .count()
    }

    /// Wait until every client has exited.
    pub async fn wait(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Client task failed");
            }
        }
        tracing::info!("All connections finished");
    }
}
