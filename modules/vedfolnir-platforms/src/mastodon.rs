//! Mastodon adapter. Media is immutable once attached to a
//! published status: captions are changed by editing the owning status
//! with the full media list re-asserted. See `build_status_edit` for the
//! "preserve text" handling of Mastodon's empty-status-text validation bug.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vedfolnir_common::types::PlatformType;

use crate::adapter::{PlatformAdapter, PostStream};
use crate::error::{PlatformError, Result};
use crate::types::{NormalizedAttachment, NormalizedPost, PostUpdate, RateLimitInfo};

pub struct MastodonConfig {
    pub instance_url: String,
    pub access_token: String,
}

pub struct MastodonAdapter {
    http: reqwest::Client,
    config: MastodonConfig,
}

#[derive(Debug, Deserialize)]
struct VerifyCredentialsResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MastodonMediaAttachment {
    id: String,
    url: String,
    #[serde(rename = "type")]
    media_type_hint: String,
    description: Option<String>,
    meta: Option<MastodonMeta>,
}

#[derive(Debug, Deserialize)]
struct MastodonMeta {
    original: Option<MastodonMetaOriginal>,
}

#[derive(Debug, Deserialize)]
struct MastodonMetaOriginal {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MastodonStatus {
    id: String,
    uri: String,
    account: MastodonAccount,
    content: String,
    created_at: DateTime<Utc>,
    media_attachments: Vec<MastodonMediaAttachment>,
}

#[derive(Debug, Deserialize)]
struct MastodonAccount {
    id: String,
}

#[derive(Debug, Serialize)]
struct MediaAttribute<'a> {
    id: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct StatusEditRequest<'a> {
    status: &'a str,
    media_ids: Vec<&'a str>,
    media_attributes: Vec<MediaAttribute<'a>>,
}

/// A single space substitutes for a genuinely empty status body (e.g. a
/// media-only post) so the edit passes Mastodon's "Text can't be blank"
/// validation.
const EMPTY_STATUS_PLACEHOLDER: &str = " ";

impl MastodonAdapter {
    pub fn new(http: reqwest::Client, config: MastodonConfig) -> Self {
        Self { http, config }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.config.access_token)
    }

    /// Mastodon has no "my statuses" endpoint; the authenticated account id
    /// must be resolved once via `verify_credentials` and used to page
    /// `/api/v1/accounts/:id/statuses`.
    async fn resolve_account_id(&self) -> Result<String> {
        let url = format!(
            "{}/api/v1/accounts/verify_credentials",
            self.config.instance_url.trim_end_matches('/')
        );
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PlatformError::Authentication(
                "Mastodon rejected the access token".to_string(),
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

    async fn fetch_page(&self, account_id: &str, max_id: Option<&str>) -> Result<Vec<MastodonStatus>> {
        let mut url = format!(
            "{}/api/v1/accounts/{account_id}/statuses?exclude_replies=true",
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

    async fn fetch_status(&self, post_id: &str) -> Result<MastodonStatus> {
        let url = format!(
            "{}/api/v1/statuses/{post_id}",
            self.config.instance_url.trim_end_matches('/')
        );
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(format!("status {post_id}")));
        }
        if !response.status().is_success() {
            return Err(PlatformError::Http {
                status: Some(response.status().as_u16()),
                message: "unexpected status fetching status".to_string(),
            });
        }
        Ok(response.json().await?)
    }

    /// Resolves the status that owns `media_id` by scanning the user's
    /// recent posts — Mastodon has no "get status for media id" endpoint.
    async fn find_owning_status(&self, media_id: &str) -> Result<MastodonStatus> {
        let account_id = self.resolve_account_id().await?;
        let page = self.fetch_page(&account_id, None).await?;
        page.into_iter()
            .find(|s| s.media_attachments.iter().any(|m| m.id == media_id))
            .ok_or_else(|| PlatformError::NotFound(format!("status owning media {media_id}")))
    }
}

/// Strips the existing status HTML to plain text, preserving it across the
/// edit; substitutes a single space if the result is empty.
fn preserved_status_text(html: &str) -> String {
    let stripped = html2text::from_read(html.as_bytes(), 10_000)
        .unwrap_or_else(|_| html.to_string())
        .trim()
        .to_string();
    if stripped.is_empty() {
        EMPTY_STATUS_PLACEHOLDER.to_string()
    } else {
        stripped
    }
}

/// Builds the status-edit payload: the full media list with the target
/// media's description replaced, and all others preserved, plus the
/// existing status body.
fn build_status_edit<'a>(
    status: &'a MastodonStatus,
    preserved_text: &'a str,
    target_media_id: &str,
    new_caption: &'a str,
) -> StatusEditRequest<'a> {
    let media_attributes = status
        .media_attachments
        .iter()
        .map(|m| MediaAttribute {
            id: &m.id,
            description: if m.id == target_media_id {
                new_caption
            } else {
                m.description.as_deref().unwrap_or("")
            },
        })
        .collect();
    let media_ids = status.media_attachments.iter().map(|m| m.id.as_str()).collect();
    StatusEditRequest {
        status: preserved_text,
        media_ids,
        media_attributes,
    }
}

fn normalize(status: MastodonStatus) -> NormalizedPost {
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
                media_type: format!("image/{}", a.media_type_hint),
                alt_text: a.description,
                width: a.meta.as_ref().and_then(|m| m.original.as_ref()).and_then(|o| o.width),
                height: a.meta.as_ref().and_then(|m| m.original.as_ref()).and_then(|o| o.height),
            })
            .collect(),
    }
}

#[async_trait]
impl PlatformAdapter for MastodonAdapter {
    fn platform_type(&self) -> PlatformType {
        PlatformType::Mastodon
    }

    async fn authenticate(&self) -> Result<()> {
        let url = format!(
            "{}/api/v1/accounts/verify_credentials",
            self.config.instance_url.trim_end_matches('/')
        );
        let response = self.authed(self.http.get(&url)).send().await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PlatformError::Authentication(
                "Mastodon rejected the access token".to_string(),
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
        let config = MastodonConfig {
            instance_url: self.config.instance_url.clone(),
            access_token: self.config.access_token.clone(),
        };
        let http = self.http.clone();
        Box::pin(try_stream! {
            let adapter = MastodonAdapter::new(http, config);
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
        Ok(normalize(self.fetch_status(post_id).await?))
    }

    /// Resolves the owning status, re-sends the full media list with the
    /// new description, and preserves existing status text.
    async fn update_media_caption(&self, media_id: &str, caption: &str) -> Result<()> {
        let status = self.find_owning_status(media_id).await?;
        let preserved_text = preserved_status_text(&status.content);
        let request = build_status_edit(&status, &preserved_text, media_id, caption);

        let url = format!(
            "{}/api/v1/statuses/{}",
            self.config.instance_url.trim_end_matches('/'),
            status.id
        );
        let response = self.authed(self.http.put(&url)).json(&request).send().await?;
        if !response.status().is_success() {
            let status_code = response.status();
            let body = response.text().await.unwrap_or_default();
            if body.contains("Text can't be blank") {
                return Err(PlatformError::Validation(
                    "status edit rejected: text can't be blank".to_string(),
                ));
            }
            return Err(PlatformError::Http {
                status: Some(status_code.as_u16()),
                message: body,
            });
        }
        Ok(())
    }

    /// Mastodon has no per-media endpoint; this performs the same
    /// status-edit path `update_media_caption` does, applying every
    /// `(media_id, description)` pair from `updated` in one PUT.
    async fn update_post(&self, post_id: &str, updated: PostUpdate) -> Result<()> {
        let status = self.fetch_status(post_id).await?;
        let preserved_text = if updated.status_text.trim().is_empty() {
            EMPTY_STATUS_PLACEHOLDER.to_string()
        } else {
            updated.status_text.clone()
        };

        let media_attributes: Vec<MediaAttribute> = status
            .media_attachments
            .iter()
            .map(|m| {
                let description = updated
                    .media_descriptions
                    .iter()
                    .find(|(id, _)| id == &m.id)
                    .map(|(_, desc)| desc.as_str())
                    .or(m.description.as_deref())
                    .unwrap_or("");
                MediaAttribute { id: &m.id, description }
            })
            .collect();
        let media_ids = status.media_attachments.iter().map(|m| m.id.as_str()).collect();

        let request = StatusEditRequest {
            status: &preserved_text,
            media_ids,
            media_attributes,
        };

        let url = format!(
            "{}/api/v1/statuses/{post_id}",
            self.config.instance_url.trim_end_matches('/')
        );
        let response = self.authed(self.http.put(&url)).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(PlatformError::Http {
                status: Some(response.status().as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    fn rate_limit_info(&self, headers: &reqwest::header::HeaderMap) -> Option<RateLimitInfo> {
        crate::ratelimit_headers::parse_standard_headers(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status(content: &str) -> MastodonStatus {
        MastodonStatus {
            id: "1".to_string(),
            uri: "https://mastodon.example/@alice/1".to_string(),
            account: MastodonAccount { id: "42".to_string() },
            content: content.to_string(),
            created_at: Utc::now(),
            media_attachments: vec![
                MastodonMediaAttachment {
                    id: "m1".to_string(),
                    url: "https://mastodon.example/m1.jpg".to_string(),
                    media_type_hint: "jpeg".to_string(),
                    description: None,
                    meta: None,
                },
                MastodonMediaAttachment {
                    id: "m2".to_string(),
                    url: "https://mastodon.example/m2.jpg".to_string(),
                    media_type_hint: "jpeg".to_string(),
                    description: Some("an existing caption".to_string()),
                    meta: None,
                },
            ],
        }
    }

    #[test]
    fn status_edit_preserves_existing_text_and_other_media() {
        let status = sample_status("<p>Hello world</p>");
        let preserved = preserved_status_text(&status.content);
        assert_eq!(preserved, "Hello world");

        let request = build_status_edit(&status, &preserved, "m1", "A red car");
        assert_eq!(request.status, "Hello world");
        assert_eq!(request.media_attributes.len(), 2);
        let m1 = request.media_attributes.iter().find(|m| m.id == "m1").unwrap();
        assert_eq!(m1.description, "A red car");
        let m2 = request.media_attributes.iter().find(|m| m.id == "m2").unwrap();
        assert_eq!(m2.description, "an existing caption");
    }

    #[test]
    fn empty_status_text_falls_back_to_single_space() {
        let status = sample_status("");
        let preserved = preserved_status_text(&status.content);
        assert_eq!(preserved, EMPTY_STATUS_PLACEHOLDER);
    }

    #[test]
    fn whitespace_only_status_html_falls_back_to_single_space() {
        let status = sample_status("<p>   </p>");
        let preserved = preserved_status_text(&status.content);
        assert_eq!(preserved, EMPTY_STATUS_PLACEHOLDER);
    }
}
