//! Pixelfed adapter. Media is mutable: the caption is PUT
//! directly on the media id. Posts are read from the user's outbox with
//! cursor-based pagination.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use vedfolnir_common::types::PlatformType;

use crate::adapter::{PlatformAdapter, PostStream};
use crate::error::{PlatformError, Result};
use crate::types::{NormalizedAttachment, NormalizedPost, PostUpdate, RateLimitInfo};

pub struct PixelfedConfig {
    pub instance_url: String,
    pub access_token: String,
}

pub struct PixelfedAdapter {
    http: reqwest::Client,
    config: PixelfedConfig,
}

#[derive(Debug, Deserialize)]
struct VerifyCredentialsResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PixelfedAttachment {
    id: String,
    url: String,
    #[serde(rename = "type")]
    media_type_hint: Option<String>,
    description: Option<String>,
    meta: Option<PixelfedMeta>,
}

#[derive(Debug, Deserialize)]
struct PixelfedMeta {
    original: Option<PixelfedMetaOriginal>,
}

#[derive(Debug, Deserialize)]
struct PixelfedMetaOriginal {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PixelfedStatus {
    id: String,
    uri: String,
    account: PixelfedAccount,
    content: String,
    created_at: DateTime<Utc>,
    media_attachments: Vec<PixelfedAttachment>,
}

#[derive(Debug, Deserialize)]
struct PixelfedAccount {
    id: String,
}

impl PixelfedAdapter {
    pub fn new(http: reqwest::Client, config: PixelfedConfig) -> Self {
        Self { http, config }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.config.access_token)
    }

    /// Pixelfed's user-post listing is served from the same
    /// accounts/:id/statuses endpoint its Mastodon-compatible API exposes;
    /// the account id is resolved once via `verify_credentials`.
    async fn resolve_account_id(&self) -> Result<String> {
        let url = format!(
            "{}/api/v1/accounts/verify_credentials",
            self.config.instance_url.trim_end_matches('/')
        );
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PlatformError::Authentication(
                "Pixelfed rejected the access token".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(PlatformError::Http {
                status: Some(response.status().as_u16()),
                message: "unexpected status verifying credentials".to_string(),
            });
        }
        let body: VerifyCredentialsResponse = response.json().await?;
        Ok(body.id)
    }

    async fn fetch_page(&self, account_id: &str, max_id: Option<&str>) -> Result<Vec<PixelfedStatus>> {
        let mut url = format!(
            "{}/api/v1/accounts/{account_id}/statuses?only_media=true",
            self.config.instance_url.trim_end_matches('/')
        );
        if let Some(max_id) = max_id {
            url = format!("{url}&max_id={max_id}");
        }
        let response = self.authed(self.http.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(PlatformError::Http {
                status: Some(response.status().as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

fn normalize(status: PixelfedStatus) -> NormalizedPost {
    NormalizedPost {
        id: status.id,
        url: status.uri,
        actor_id: status.account.id,
        created_at: status.created_at,
        text: html2text::from_read(status.content.as_bytes(), 10_000).unwrap_or(status.content),
        attachments: status
            .media_attachments
            .into_iter()
            .map(|a| NormalizedAttachment {
                id: a.id,
                url: a.url,
                media_type: a
                    .media_type_hint
                    .map(|t| format!("image/{t}"))
                    .unwrap_or_else(|| "image/jpeg".to_string()),
                alt_text: a.description,
                width: a.meta.as_ref().and_then(|m| m.original.as_ref()).and_then(|o| o.width),
                height: a.meta.as_ref().and_then(|m| m.original.as_ref()).and_then(|o| o.height),
            })
            .collect(),
    }
}

#[async_trait]
impl PlatformAdapter for PixelfedAdapter {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Pixelfed
    }

    async fn authenticate(&self) -> Result<()> {
        let url = format!(
            "{}/api/v1/accounts/verify_credentials",
            self.config.instance_url.trim_end_matches('/')
        );
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PlatformError::Authentication(
                "Pixelfed rejected the access token".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(PlatformError::Http {
                status: Some(response.status().as_u16()),
                message: "unexpected status verifying credentials".to_string(),
            });
        }
        let _: VerifyCredentialsResponse = response.json().await?;
        Ok(())
    }

    fn list_user_posts(&self, limit: usize) -> PostStream {
        let adapter = PixelfedConfig {
            instance_url: self.config.instance_url.clone(),
            access_token: self.config.access_token.clone(),
        };
        let http = self.http.clone();
        Box::pin(try_stream! {
            let adapter = PixelfedAdapter::new(http, adapter);
            let account_id = adapter.resolve_account_id().await?;
            let mut max_id: Option<String> = None;
            let mut yielded = 0usize;
            loop {
                if yielded >= limit {
                    break;
                }
                let page = adapter.fetch_page(&account_id, max_id.as_deref()).await?;
                if page.is_empty() {
                    break;
                }
                max_id = page.last().map(|s| s.id.clone());
                for status in page {
                    if yielded >= limit {
                        break;
                    }
                    yield normalize(status);
                    yielded += 1;
                }
            }
        })
    }

    async fn get_post(&self, post_id: &str) -> Result<NormalizedPost> {
        let url = format!(
            "{}/api/v1/statuses/{post_id}",
            self.config.instance_url.trim_end_matches('/')
        );
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(format!("post {post_id}")));
        }
        if !response.status().is_success() {
            return Err(PlatformError::Http {
                status: Some(response.status().as_u16()),
                message: "unexpected status fetching post".to_string(),
            });
        }
        let status: PixelfedStatus = response.json().await?;
        Ok(normalize(status))
    }

    /// `PUT /api/v1/media/:id` with `description=...`.
    async fn update_media_caption(&self, media_id: &str, caption: &str) -> Result<()> {
        let url = format!(
            "{}/api/v1/media/{media_id}",
            self.config.instance_url.trim_end_matches('/')
        );
        let response = self
            .authed(self.http.put(&url))
            .form(&[("description", caption)])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(format!("media {media_id}")));
        }
        if !response.status().is_success() {
            return Err(PlatformError::Http {
                status: Some(response.status().as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Pixelfed has a direct media endpoint; whole-post update is only
    /// used as a fallback if that endpoint is ever unavailable.
    async fn update_post(&self, post_id: &str, updated: PostUpdate) -> Result<()> {
        for (media_id, description) in &updated.media_descriptions {
            self.update_media_caption(media_id, description).await?;
        }
        let _ = post_id;
        Ok(())
    }

    fn rate_limit_info(&self, headers: &reqwest::header::HeaderMap) -> Option<RateLimitInfo> {
        crate::ratelimit_headers::parse_standard_headers(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_status_with_missing_meta() {
        let status = PixelfedStatus {
            id: "1".to_string(),
            uri: "https://pixelfed.example/p/1".to_string(),
            account: PixelfedAccount { id: "42".to_string() },
            content: "<p>Hello <b>world</b></p>".to_string(),
            created_at: Utc::now(),
            media_attachments: vec![PixelfedAttachment {
                id: "m1".to_string(),
                url: "https://pixelfed.example/m1.jpg".to_string(),
                media_type_hint: Some("jpeg".to_string()),
                description: None,
                meta: None,
            }],
        };
        let post = normalize(status);
        assert_eq!(post.attachments.len(), 1);
        assert!(post.attachments[0].needs_caption());
        assert!(post.text.contains("Hello"));
    }
}
