use async_trait::async_trait;
use reqwest::{Request, Response};

/// Seam over the HTTP stack used to download remote sources.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
