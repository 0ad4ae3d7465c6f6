//! Gemini Live transport for `livewire-core`.

mod session;
pub mod types;

pub use session::GeminiSession;

use async_trait::async_trait;
use livewire_core::{
    LiveConfig, LiveConnector, LiveError, SessionHandle, SessionResumptionHandle, ToolSchema,
};
use std::sync::Arc;
use tracing::info;

use crate::types::Setup;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Opens Gemini Live sessions. Gemini issues resumption handles, so
/// dropped sessions can be resumed.
#[derive(Clone)]
pub struct GeminiLiveConnector {
    api_key: String,
    endpoint: String,
}

impl GeminiLiveConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }
}

impl std::fmt::Debug for GeminiLiveConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveConnector")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        config: &LiveConfig,
        tools: &[ToolSchema],
        resumption: Option<SessionResumptionHandle>,
    ) -> Result<Arc<dyn SessionHandle>, LiveError> {
        info!(
            model = %config.model,
            tools = tools.len(),
            resuming = resumption.is_some(),
            "Opening Gemini Live session."
        );
        let setup = Setup::new(config, tools, resumption.as_ref());
        let session = GeminiSession::connect(&self.url(), setup).await?;
        Ok(Arc::new(session))
    }

    fn supports_native_recovery(&self) -> bool {
        true
    }
}
