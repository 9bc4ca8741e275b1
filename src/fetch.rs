//! Reading image bytes from a URL, a `data:` URI or the filesystem.

use base64::Engine;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SimilarityError};

/// Refuse bodies larger than this.
const MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Blocking image fetcher. Call from `spawn_blocking`.
#[derive(Clone)]
pub struct ImageFetcher {
    agent: ureq::Agent,
}

impl ImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .user_agent(concat!("clipscore/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }

    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SimilarityError::EmptyInput("image url is empty".into()));
        }

        let bytes = if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url)?
        } else if let Some(rest) = url.strip_prefix("data:") {
            decode_data_uri(rest)?
        } else {
            read_local(url)?
        };

        tracing::debug!(url = %display_url(url), bytes = bytes.len(), "Fetched image");
        Ok(bytes)
    }

    fn fetch_http(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                SimilarityError::ImageFetch(format!("{} returned HTTP {}", url, code))
            }
            other => SimilarityError::ImageFetch(format!("failed to fetch {}: {}", url, other)),
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_IMAGE_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| SimilarityError::ImageFetch(format!("failed to read {}: {}", url, e)))?;

        if bytes.len() as u64 > MAX_IMAGE_BYTES {
            return Err(SimilarityError::ImageFetch(format!(
                "{} is larger than {} bytes",
                url, MAX_IMAGE_BYTES
            )));
        }
        Ok(bytes)
    }
}

/// `data:[<mime>][;base64],<payload>`; only base64 payloads carry images.
fn decode_data_uri(rest: &str) -> Result<Vec<u8>> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| SimilarityError::ImageFetch("data URI has no payload".into()))?;

    if !meta.ends_with(";base64") {
        return Err(SimilarityError::ImageFetch(
            "only base64 data URIs are supported".into(),
        ));
    }

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| SimilarityError::ImageFetch(format!("invalid base64 in data URI: {}", e)))
}

fn read_local(url: &str) -> Result<Vec<u8>> {
    let path = match url.strip_prefix("file://") {
        Some(rest) => PathBuf::from(rest),
        None if url.contains("://") => {
            return Err(SimilarityError::ImageFetch(format!(
                "unsupported url scheme: {}",
                url
            )))
        }
        None => PathBuf::from(url),
    };

    std::fs::read(&path)
        .map_err(|e| SimilarityError::ImageFetch(format!("failed to read {}: {}", path.display(), e)))
}

/// Keep log lines short for inline images.
fn display_url(url: &str) -> &str {
    if url.starts_with("data:") {
        url.split(',').next().unwrap_or("data:")
    } else {
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::png_bytes;

    fn fetcher() -> ImageFetcher {
        ImageFetcher::new(Duration::from_secs(1))
    }

    #[test]
    fn test_data_uri() {
        let png = png_bytes(3, 3, [10, 20, 30]);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
        let url = format!("data:image/png;base64,{}", encoded);
        assert_eq!(fetcher().fetch(&url).unwrap(), png);
    }

    #[test]
    fn test_bad_data_uris() {
        for url in [
            "data:image/png;base64",
            "data:text/plain,hello",
            "data:image/png;base64,@@not base64@@",
        ] {
            assert!(
                matches!(fetcher().fetch(url), Err(SimilarityError::ImageFetch(_))),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_local_path_and_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dog.png");
        let png = png_bytes(5, 4, [1, 2, 3]);
        std::fs::write(&path, &png).unwrap();

        assert_eq!(fetcher().fetch(&path.to_string_lossy()).unwrap(), png);
        let url = format!("file://{}", path.display());
        assert_eq!(fetcher().fetch(&url).unwrap(), png);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.jpg");
        assert!(matches!(
            fetcher().fetch(&missing.to_string_lossy()),
            Err(SimilarityError::ImageFetch(_))
        ));
    }

    #[test]
    fn test_empty_and_unsupported() {
        assert!(matches!(
            fetcher().fetch("  "),
            Err(SimilarityError::EmptyInput(_))
        ));
        assert!(matches!(
            fetcher().fetch("ftp://example.com/cat.png"),
            Err(SimilarityError::ImageFetch(_))
        ));
    }

    #[test]
    fn test_unreachable_host() {
        let err = fetcher().fetch("http://127.0.0.1:1/cat.png").unwrap_err();
        assert!(matches!(err, SimilarityError::ImageFetch(_)));
    }
}
