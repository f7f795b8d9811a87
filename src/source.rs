//! Image locators for batch processing: paths, URLs and data URIs

use anyhow::{anyhow, bail, ensure, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbImage;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// Largest remote image body we are willing to buffer
const MAX_REMOTE_BYTES: u64 = 32 * 1024 * 1024;

/// Where a source image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    Url(String),
    DataUri(String),
}

/// Settings for fetching remote images
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub bearer_token: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            bearer_token: None,
        }
    }
}

/// Trim a locator and reject placeholder values such as `"undefined"` or `"/null"`
pub fn sanitize_locator(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    let lower = trimmed.to_ascii_lowercase();
    let bare = lower.trim_start_matches('/');
    if trimmed.is_empty() || matches!(bare, "" | "undefined" | "null") {
        return None;
    }
    Some(trimmed)
}

impl ImageSource {
    pub fn parse(locator: &str) -> Result<Self> {
        let locator = sanitize_locator(locator).ok_or_else(|| anyhow!("empty image locator"))?;
        let lower = locator.to_ascii_lowercase();

        if lower.starts_with("data:") {
            Ok(Self::DataUri(locator.to_string()))
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Self::Url(locator.to_string()))
        } else if lower.starts_with("file://") {
            file_url_path(&locator["file://".len()..]).map(Self::Path)
        } else {
            Ok(Self::Path(PathBuf::from(locator)))
        }
    }

    /// Fetch and decode to RGB. Blocking.
    pub fn load(&self, fetch: &FetchOptions) -> Result<RgbImage> {
        let bytes = match self {
            Self::Path(path) => std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            Self::Url(url) => fetch_url(url, fetch)?,
            Self::DataUri(uri) => decode_data_uri(uri)?,
        };

        let image = image::load_from_memory(&bytes).context("Unrecognized or corrupt image data")?;
        ensure!(
            image.width() > 0 && image.height() > 0,
            "decoded image has no pixels"
        );
        Ok(image.to_rgb8())
    }
}

/// Path part of a `file://` URL: empty or `localhost` authority, percent-escapes decoded
fn file_url_path(rest: &str) -> Result<PathBuf> {
    let (authority, path) = match rest.find('/') {
        Some(slash) => rest.split_at(slash),
        None => bail!("file URL has no path"),
    };
    ensure!(
        authority.is_empty() || authority.eq_ignore_ascii_case("localhost"),
        "file URL host {authority:?} is not local"
    );
    let path = path.split(['?', '#']).next().unwrap_or_default();
    Ok(PathBuf::from(percent_decode(path)?))
}

fn percent_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = value
                .get(i + 1..i + 3)
                .filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| anyhow!("invalid percent-escape in {value:?}"))?;
            decoded.push(hex);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).context("file URL path is not UTF-8")
}

fn fetch_url(url: &str, fetch: &FetchOptions) -> Result<Vec<u8>> {
    let _span = tracing::debug_span!("fetch", url).entered();

    let agent = ureq::AgentBuilder::new().timeout(fetch.timeout).build();
    let mut request = agent.get(url);
    if let Some(token) = &fetch.bearer_token {
        request = request.set("Authorization", &format!("Bearer {token}"));
    }

    let response = match request.call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => bail!("{url} returned HTTP {code}"),
        Err(e) => bail!("Failed to fetch {url}: {e}"),
    };

    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_REMOTE_BYTES + 1)
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read body of {url}"))?;
    ensure!(
        bytes.len() as u64 <= MAX_REMOTE_BYTES,
        "{url} is larger than {MAX_REMOTE_BYTES} bytes"
    );
    Ok(bytes)
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let (header, payload) = uri["data:".len()..]
        .split_once(',')
        .ok_or_else(|| anyhow!("data URI has no payload"))?;
    ensure!(
        header.to_ascii_lowercase().ends_with(";base64"),
        "only base64 data URIs are supported"
    );
    STANDARD
        .decode(payload.trim())
        .context("Invalid base64 in data URI")
}
