//! Source loading from local paths or HTTP(S) URLs.
//!
//! Sources whose name ends in `.gz` are gunzipped after reading.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use std::io::Read;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tracing::debug;

/// True for `http://` and `https://` sources.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Reads `source` from disk or over HTTP, decompressing `.gz` sources.
#[tracing::instrument(skip(client))]
pub async fn load_source<C: HttpClient>(client: &C, source: &str) -> Result<Vec<u8>> {
    let bytes = if is_url(source) {
        fetch_bytes(client, source)
            .await
            .with_context(|| format!("downloading {source}"))?
    } else {
        tokio::fs::read(source)
            .await
            .with_context(|| format!("reading {source}"))?
    };
    debug!(bytes = bytes.len(), "Source read");

    if is_gzip_name(source) {
        return gunzip(&bytes).with_context(|| format!("decompressing {source}"));
    }
    Ok(bytes)
}

fn is_gzip_name(source: &str) -> bool {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    path.ends_with(".gz")
}

pub fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}
