use crate::session::Outbound;
use klaudkod_core::agent_loop::LlmClient;
use klaudkod_core::config::AppConfig;
use klaudkod_core::provider::ChatProvider;
use klaudkod_core::tool_registry::ToolRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Shared application state for the server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tool_registry: Arc<ToolRegistry>,
    pub llm: Arc<LlmClient>,
    pub sessions: SessionHub,
    /// Cancelled on server shutdown; every connection token derives from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        tool_registry: Arc<ToolRegistry>,
        provider: Arc<dyn ChatProvider>,
    ) -> Self {
        let llm = LlmClient::new(provider, config.session.max_tool_iterations);
        Self {
            config: Arc::new(config),
            tool_registry,
            llm: Arc::new(llm),
            sessions: SessionHub::default(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Live connections by session id.
#[derive(Clone, Default)]
pub struct SessionHub {
    sessions: Arc<RwLock<HashMap<String, Outbound>>>,
}

impl SessionHub {
    pub async fn register(&self, session_id: &str, outbound: Outbound) {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), outbound);
    }

    /// Drop the session and close its outbound queue.
    pub async fn unregister(&self, session_id: &str) {
        if let Some(outbound) = self.sessions.write().await.remove(session_id) {
            outbound.close();
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unregister_closes_outbound() {
        let hub = SessionHub::default();
        let (outbound, _rx) = Outbound::channel(4);

        hub.register("s1", outbound.clone()).await;
        assert_eq!(hub.len().await, 1);

        hub.unregister("s1").await;
        assert!(hub.is_empty().await);
        assert!(outbound.is_closed());

        // Unknown ids are ignored.
        hub.unregister("s1").await;
    }
}
