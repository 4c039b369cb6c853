//! Client-side answers to server call-backs.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::password::PasswordPrompt;
use crate::channel::{Call, Channel, RemoteFailure, Reply, RequestHandler};
use crate::credentials::{normalize_url, CredentialStore};

/// Serves the server's requests for client-local state.
///
/// Only the call-backs listed in [`Call`] are answered; command execution
/// requests from the server are refused. Credential-store calls only ever
/// touch the entry for the URL this client connected to, whatever URL the
/// server names.
pub struct ClientCallbacks {
    server_url: String,
    store: Option<Arc<Mutex<CredentialStore>>>,
    build_token: Option<String>,
    prompt: Arc<dyn PasswordPrompt>,
}

impl ClientCallbacks {
    pub fn new(
        server_url: &str,
        store: Option<Arc<Mutex<CredentialStore>>>,
        build_token: Option<String>,
        prompt: Arc<dyn PasswordPrompt>,
    ) -> Self {
        Self {
            server_url: normalize_url(server_url),
            store,
            build_token,
            prompt,
        }
    }

    /// Store key for a call that names `requested`.
    fn store_key(&self, requested: &str) -> String {
        if normalize_url(requested) != self.server_url {
            warn!(
                requested,
                connected = %self.server_url,
                "server asked for another server's credentials; using the connected URL"
            );
        }
        self.server_url.clone()
    }

    fn store(&self) -> Result<Arc<Mutex<CredentialStore>>, RemoteFailure> {
        self.store
            .clone()
            .ok_or_else(|| RemoteFailure::new("no credential store on this client"))
    }

    async fn read_password_file(path: String) -> Result<Reply, RemoteFailure> {
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Reply::Text {
                value: Some(contents),
            }),
            Err(e) => Err(RemoteFailure::new(format!("cannot read {}: {}", path, e))),
        }
    }

    async fn prompt_password(&self, message: String) -> Result<Reply, RemoteFailure> {
        let prompt = self.prompt.clone();
        let answer = tokio::task::spawn_blocking(move || prompt.prompt(&message))
            .await
            .map_err(|e| RemoteFailure::new(format!("prompt task failed: {}", e)))?
            .map_err(|e| RemoteFailure::new(format!("prompt failed: {}", e)))?;
        Ok(Reply::Text { value: answer })
    }

    async fn store_token(&self, url: String, token: String) -> Result<Reply, RemoteFailure> {
        let store = self.store()?;
        let url = self.store_key(&url);
        tokio::task::spawn_blocking(move || store.lock().put(&url, &token))
            .await
            .map_err(|e| RemoteFailure::new(format!("store task failed: {}", e)))?
            .map_err(|e| RemoteFailure::new(e.to_string()))?;
        Ok(Reply::Done)
    }

    async fn remove_token(&self, url: String) -> Result<Reply, RemoteFailure> {
        let store = self.store()?;
        let url = self.store_key(&url);
        let existed = tokio::task::spawn_blocking(move || store.lock().remove(&url))
            .await
            .map_err(|e| RemoteFailure::new(format!("store task failed: {}", e)))?
            .map_err(|e| RemoteFailure::new(e.to_string()))?;
        Ok(Reply::Flag { value: existed })
    }
}

#[async_trait]
impl RequestHandler for ClientCallbacks {
    async fn handle(&self, call: Call, _channel: Channel) -> Result<Reply, RemoteFailure> {
        debug!(call = call.kind(), "server call-back");
        match call {
            Call::ReadPasswordFile { path } => Self::read_password_file(path).await,
            Call::PromptPassword { prompt } => self.prompt_password(prompt).await,
            Call::ReadStoredToken { url } => {
                let url = self.store_key(&url);
                let value = self
                    .store
                    .as_ref()
                    .and_then(|store| store.lock().get(&url).map(str::to_string));
                Ok(Reply::Text { value })
            }
            Call::StoreToken { url, token } => self.store_token(url, token).await,
            Call::RemoveToken { url } => self.remove_token(url).await,
            Call::ReadBuildToken => Ok(Reply::Text {
                value: self.build_token.clone(),
            }),
            other @ (Call::Execute(_) | Call::HasCommand { .. }) => Err(RemoteFailure::new(
                format!("{} is not accepted by the client", other.kind()),
            )),
        }
    }
}
