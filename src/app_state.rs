use crate::config::Config;
use crate::edge::EdgeValidator;
use crate::entry::EntryStoreResolver;
use crate::issuer::TokenIssuer;
use crate::object_store::ObjectStore;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub object_store: Arc<ObjectStore>,
    pub entry_store: EntryStoreResolver,
    pub issuer: TokenIssuer,
    pub validator: EdgeValidator,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let object_store = ObjectStore::new(config.storage_backend()?)?;
        let resolver = EntryStoreResolver::new(config.entry_store_config());

        if config.public_url.is_none() {
            warn!(
                public_url = %config.public_url(),
                "No public URL configured, issued URLs point at the local listener"
            );
        }

        // Resolve once at cold start. A failure is retried on the next request.
        match resolver.resolve().await {
            Ok(store) => info!(backend = store.backend(), "Entry store ready"),
            Err(error) => warn!(%error, "Entry store unavailable at startup"),
        }

        Ok(Self::from_parts(object_store, resolver, config))
    }

    /// Assemble state around an existing object store and entry store resolver
    pub fn from_parts(
        object_store: ObjectStore,
        resolver: EntryStoreResolver,
        config: &Config,
    ) -> Self {
        let issuer = TokenIssuer::new(resolver.clone(), config.issuer_settings());
        let validator = EdgeValidator::new(resolver.clone(), config.edge_timeout());

        Self {
            object_store: Arc::new(object_store),
            entry_store: resolver,
            issuer,
            validator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issuer_and_validator_share_entry_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            workspace: dir.path().to_string_lossy().into_owned(),
            entry_store: "memory".into(),
            ..Default::default()
        };

        let state = AppState::new(&config).await.unwrap();
        assert!(state.entry_store.is_resolved());

        let issued = state.issuer.issue().await.unwrap();
        let query = format!("token={}", issued.token);
        assert_eq!(state.validator.admit(Some(query.as_str())).await.unwrap(), issued.token);
        assert!(state.validator.admit(Some(query.as_str())).await.is_err());
    }

    #[tokio::test]
    async fn test_startup_survives_unavailable_entry_store() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let config = Config {
            workspace: dir.path().to_string_lossy().into_owned(),
            entry_store_path: Some(blocker.join("entries.db").to_string_lossy().into_owned()),
            ..Default::default()
        };

        let state = AppState::new(&config).await.unwrap();
        assert!(!state.entry_store.is_resolved());
        assert!(state.issuer.issue().await.is_err());
    }
}
