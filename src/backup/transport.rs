use std::sync::Arc;

use reqwest::header::AUTHORIZATION;

use crate::auth::TokenSource;

/// Status and body of one content request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ContentResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Authenticated GET against signed content URLs.
///
/// `Err` means the request never produced a response (connect, TLS, body
/// read); every HTTP status, good or bad, comes back as `Ok`.
#[async_trait::async_trait]
pub trait ContentTransport: Send + Sync {
    async fn get(&self, url: &str) -> anyhow::Result<ContentResponse>;
}

/// `reqwest` transport, authenticated by an optional [`TokenSource`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    tokens: Option<Arc<TokenSource>>,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http, tokens: None }
    }

    pub fn with_tokens(mut self, tokens: Arc<TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

#[async_trait::async_trait]
impl ContentTransport for HttpTransport {
    async fn get(&self, url: &str) -> anyhow::Result<ContentResponse> {
        let mut request = self.http.get(url);
        if let Some(tokens) = &self.tokens {
            request = request.header(AUTHORIZATION, tokens.authorization().await?);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(ContentResponse { status, body })
    }
}
