use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::ImageFormat;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::error::{MediaError, Result};

/// Tunables for fetching and re-encoding images. Mirrors the Storage group
/// of the central configuration; kept local here so this crate has no
/// forward dependency on the binary-level config.
#[derive(Debug, Clone)]
pub struct ImageProcessorConfig {
    pub max_download_bytes: usize,
    pub max_dimension: u32,
    pub request_timeout: Duration,
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            max_download_bytes: 20 * 1024 * 1024,
            max_dimension: 4096,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// An image fetched and validated, ready for either caption generation or
/// long-term storage. `content_hash` is the sha256 of the *source URL*, not
/// the body — see `ImageProcessor::fetch` for why.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub content_hash: String,
    pub bytes: Bytes,
    pub media_type: String,
    pub width: u32,
    pub height: u32,
    pub was_resized: bool,
}

type InFlight = Arc<OnceCell<std::result::Result<FetchedImage, String>>>;

/// Downloads, validates and optionally re-encodes images from platform
/// attachment URLs, deduplicating concurrent requests for the same URL.
pub struct ImageProcessor {
    client: Client,
    config: ImageProcessorConfig,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl ImageProcessor {
    pub fn new(config: ImageProcessorConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client build");
        Self {
            client,
            config,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Content-address key for a URL: sha256 of the UTF-8 bytes of `url`.
    /// Hashing the URL rather than the body lets callers decide the storage
    /// path before the response has arrived, and keeps the key stable even
    /// if the remote recompresses the asset between requests.
    pub fn hash_url(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Fetch an image by URL, deduplicating concurrent fetches of the same
    /// URL behind a single in-flight future.
    pub async fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let hash = Self::hash_url(url);

        let cell: InFlight = {
            let mut guard = self.in_flight.lock().await;
            guard
                .entry(hash.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| async { self.fetch_uncached(url, &hash).await.map_err(|e| e.to_string()) })
            .await
            .clone();

        // Drop the entry once settled so a later retry for the same URL
        // (e.g. after the remote content changes) triggers a fresh fetch
        // rather than returning a stale cached error forever.
        self.in_flight.lock().await.remove(&hash);

        result.map_err(|msg| MediaError::Other(anyhow::anyhow!(msg)))
    }

    async fn fetch_uncached(&self, url: &str, hash: &str) -> Result<FetchedImage> {
        debug!(url, hash, "fetching image");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(MediaError::BadStatus {
                status: response.status(),
                url: url.to_string(),
            });
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.config.max_download_bytes {
                return Err(MediaError::TooLarge {
                    size: len as usize,
                    limit: self.config.max_download_bytes,
                });
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() > self.config.max_download_bytes {
            return Err(MediaError::TooLarge {
                size: bytes.len(),
                limit: self.config.max_download_bytes,
            });
        }

        let format = image::guess_format(&bytes).map_err(MediaError::InvalidImage)?;
        let media_type = media_type_for(format).ok_or_else(|| {
            MediaError::UnsupportedFormat(format!("{:?}", format))
        })?;

        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(MediaError::InvalidImage)?;
        let (width, height) = (decoded.width(), decoded.height());

        let longest = width.max(height);
        if longest <= self.config.max_dimension {
            return Ok(FetchedImage {
                content_hash: hash.to_string(),
                bytes,
                media_type,
                width,
                height,
                was_resized: false,
            });
        }

        warn!(
            url,
            width,
            height,
            max = self.config.max_dimension,
            "resizing oversize image"
        );
        let scale = self.config.max_dimension as f64 / longest as f64;
        let new_w = (width as f64 * scale).round().max(1.0) as u32;
        let new_h = (height as f64 * scale).round().max(1.0) as u32;
        let resized = decoded.resize(new_w, new_h, image::imageops::FilterType::Lanczos3);

        let mut out = std::io::Cursor::new(Vec::new());
        resized
            .write_to(&mut out, format)
            .map_err(MediaError::InvalidImage)?;

        Ok(FetchedImage {
            content_hash: hash.to_string(),
            bytes: Bytes::from(out.into_inner()),
            media_type,
            width: new_w,
            height: new_h,
            was_resized: true,
        })
    }
}

fn media_type_for(format: ImageFormat) -> Option<String> {
    let mime = match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_url_is_stable_and_distinguishes_urls() {
        let a = ImageProcessor::hash_url("https://example.com/a.jpg");
        let b = ImageProcessor::hash_url("https://example.com/a.jpg");
        let c = ImageProcessor::hash_url("https://example.com/b.jpg");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn media_type_recognises_common_formats() {
        assert_eq!(media_type_for(ImageFormat::Png).as_deref(), Some("image/png"));
        assert_eq!(media_type_for(ImageFormat::Jpeg).as_deref(), Some("image/jpeg"));
        assert_eq!(media_type_for(ImageFormat::Avif), None);
    }

    #[tokio::test]
    async fn fetch_rejects_unreachable_host() {
        let processor = ImageProcessor::new(ImageProcessorConfig::default());
        let err = processor
            .fetch("http://127.0.0.1:1/nonexistent.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Other(_)));
    }
}
