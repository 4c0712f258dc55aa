//! Constructs the correct `PlatformAdapter` for a `PlatformConnection`
//!. Detection tries the cheap
//! `detect_from_url` heuristic first and trusts the connection's stored
//! `platform_type` when it disagrees — the heuristic only matters the first
//! time a connection is created.

use std::sync::Arc;

use vedfolnir_common::types::{PlatformConnection, PlatformCredentials, PlatformType};

use crate::adapter::PlatformAdapter;
use crate::mastodon::{MastodonAdapter, MastodonConfig};
use crate::pixelfed::{PixelfedAdapter, PixelfedConfig};
use crate::pleroma::{PleromaAdapter, PleromaConfig};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Pleroma support is best-effort (see `pleroma` module docs) and is
    /// gated behind this flag per the Open Question resolution in
    /// `DESIGN.md`.
    pub pleroma_enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { pleroma_enabled: true }
    }
}

pub struct PlatformRegistry {
    http: reqwest::Client,
    config: RegistryConfig,
}

impl PlatformRegistry {
    pub fn new(http: reqwest::Client, config: RegistryConfig) -> Self {
        Self { http, config }
    }

    /// Builds the adapter for `connection`'s stored `platform_type`,
    /// authenticated with the already-decrypted `credentials`. The Platform
    /// Context hands these over scoped to one worker session; they are
    /// never persisted here.
    pub fn adapter_for(
        &self,
        connection: &PlatformConnection,
        credentials: &PlatformCredentials,
    ) -> crate::error::Result<Arc<dyn PlatformAdapter>> {
        match connection.platform_type {
            PlatformType::Pixelfed => Ok(Arc::new(PixelfedAdapter::new(
                self.http.clone(),
                PixelfedConfig {
                    instance_url: connection.instance_url.clone(),
                    access_token: credentials.access_token.clone(),
                },
            ))),
            PlatformType::Mastodon => Ok(Arc::new(MastodonAdapter::new(
                self.http.clone(),
                MastodonConfig {
                    instance_url: connection.instance_url.clone(),
                    access_token: credentials.access_token.clone(),
                },
            ))),
            PlatformType::Pleroma => {
                if !self.config.pleroma_enabled {
                    return Err(crate::error::PlatformError::UndetectedPlatform(format!(
                        "pleroma support is disabled for instance {}",
                        connection.instance_url
                    )));
                }
                Ok(Arc::new(PleromaAdapter::new(
                    self.http.clone(),
                    PleromaConfig {
                        instance_url: connection.instance_url.clone(),
                        access_token: credentials.access_token.clone(),
                    },
                )))
            }
        }
    }

    /// Used when creating a new connection, before a `platform_type` is
    /// stored: combines the URL heuristic with a live probe so an
    /// ambiguous hostname doesn't silently pick the wrong adapter.
    pub async fn detect_and_probe(&self, instance_url: &str) -> PlatformType {
        let guess = crate::detect::detect_from_url(instance_url);
        if self.instance_is_pixelfed(instance_url).await {
            return PlatformType::Pixelfed;
        }
        guess
    }

    async fn instance_is_pixelfed(&self, instance_url: &str) -> bool {
        let url = format!("{}/api/v1/instance", instance_url.trim_end_matches('/'));
        match self.http.get(&url).send().await {
            Ok(response) => response
                .text()
                .await
                .map(|body| body.to_lowercase().contains("pixelfed"))
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn connection(platform_type: PlatformType) -> PlatformConnection {
        PlatformConnection {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "test".to_string(),
            platform_type,
            instance_url: "https://example.social".to_string(),
            username: "alice".to_string(),
            access_token_ciphertext: vec![],
            client_key_ciphertext: None,
            client_secret_ciphertext: None,
            is_active: true,
            is_default: true,
            last_checked_at: None,
            last_error: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn credentials() -> PlatformCredentials {
        PlatformCredentials {
            access_token: "token".to_string(),
            client_key: None,
            client_secret: None,
        }
    }

    #[test]
    fn builds_adapter_matching_stored_platform_type() {
        let registry = PlatformRegistry::new(reqwest::Client::new(), RegistryConfig::default());
        let adapter = registry
            .adapter_for(&connection(PlatformType::Mastodon), &credentials())
            .unwrap();
        assert_eq!(adapter.platform_type(), PlatformType::Mastodon);
    }

    #[test]
    fn pleroma_adapter_rejected_when_disabled() {
        let registry = PlatformRegistry::new(
            reqwest::Client::new(),
            RegistryConfig { pleroma_enabled: false },
        );
        let result = registry.adapter_for(&connection(PlatformType::Pleroma), &credentials());
        assert!(result.is_err());
    }
}
