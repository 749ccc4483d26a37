//! Uploads a built output directory to S3.

use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

/// Content type served for an output file name.
pub fn content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("geojson") => "application/geo+json",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Object key for `name` under an optional prefix.
pub fn object_key(prefix: Option<&str>, name: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/{name}"),
        _ => name.to_string(),
    }
}

/// Uploads every regular file directly inside `dir`. Returns the number of
/// objects written.
#[tracing::instrument(skip(client), fields(dir = %dir.display()))]
pub async fn upload_dir(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    prefix: Option<&str>,
    dir: &Path,
) -> Result<usize> {
    let mut upload_count = 0;

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let key = object_key(prefix, name);
        let body = std::fs::read(&path)?;
        debug!(key = %key, bytes = body.len(), "Uploading");

        client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .content_type(content_type(name))
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("uploading s3://{bucket}/{key}"))?;

        upload_count += 1;
    }

    info!(upload_count, bucket, "S3 upload complete");
    Ok(upload_count)
}
