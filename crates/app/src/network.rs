//! Change feed wiring for the app
//!
//! A client can serve its hub to other processes (`feed.listen_port`) and
//! join a relay (`feed.upstream`). Changes from the relay are injected into
//! the local hub only; they are never forwarded back, so no loop forms.

use std::net::SocketAddr;
use std::sync::Arc;

use campus_net::{ConnectionState, FeedClient, FeedServer, Hub, Subscription, Table, Topic};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::FeedConfig;
use crate::error::{ClientError, Result};

/// Every table relayed from upstream
const RELAYED_TABLES: [Table; 5] = [
    Table::Profiles,
    Table::Rooms,
    Table::Messages,
    Table::Notices,
    Table::Materials,
];

/// Live connections of this process's feed
#[derive(Default)]
pub struct FeedLinks {
    server: Option<FeedServer>,
    upstream: Option<Arc<FeedClient>>,
    relays: Vec<JoinHandle<()>>,
}

impl FeedLinks {
    /// Start whatever `config` asks for
    pub async fn start(config: &FeedConfig, hub: &Hub) -> Result<Self> {
        let mut links = FeedLinks::default();

        if let Some(port) = config.listen_port {
            let server = FeedServer::start(port, hub.clone()).await?;
            info!(addr = %server.addr(), "Serving change feed");
            links.server = Some(server);
        }

        if let Some(upstream) = &config.upstream {
            let addr = resolve(upstream).await?;
            let client = Arc::new(FeedClient::connect(addr).await?);
            for table in RELAYED_TABLES {
                let sub = client.subscribe(Topic::all(table)).await?;
                links.relays.push(tokio::spawn(relay(sub, hub.clone())));
            }
            info!(addr = %addr, "Joined feed relay");
            links.upstream = Some(client);
        }

        Ok(links)
    }

    pub fn upstream(&self) -> Option<Arc<FeedClient>> {
        self.upstream.clone()
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(FeedServer::addr)
    }

    pub async fn upstream_state(&self) -> Option<ConnectionState> {
        match &self.upstream {
            Some(client) => Some(client.connection_state().await),
            None => None,
        }
    }

    pub async fn shutdown(mut self) {
        for handle in self.relays.drain(..) {
            handle.abort();
        }
        if let Some(client) = self.upstream.take() {
            client.shutdown().await;
        }
        if let Some(server) = self.server.take() {
            server.shutdown();
        }
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| ClientError::Config(format!("feed.upstream {:?} did not resolve", addr)))
}

/// Feed upstream changes into the local hub
async fn relay(mut sub: Subscription, hub: Hub) {
    while let Some(event) = sub.recv().await {
        hub.publish(event);
    }
    debug!(topic = ?sub.topic(), "Upstream relay ended");
}
