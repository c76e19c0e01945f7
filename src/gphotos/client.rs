use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::auth::TokenSource;

use super::error::ApiError;
use super::types::{AlbumsPage, MediaItem, MediaItemsPage, SearchRequest, ALBUM_PAGE_SIZE};
use super::LibrarySource;

pub const DEFAULT_BASE_URL: &str = "https://photoslibrary.googleapis.com";

/// Library API client. Requests carry the `Authorization` header of the
/// attached [`TokenSource`], if any.
#[derive(Debug, Clone)]
pub struct PhotosClient {
    http: Client,
    base_url: String,
    tokens: Option<Arc<TokenSource>>,
}

impl PhotosClient {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL)
    }

    /// Point the client at a different API root. Used by tests.
    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            tokens: None,
        }
    }

    pub fn with_tokens(mut self, tokens: Arc<TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, ApiError> {
        let builder = self.http.request(method, url);
        match &self.tokens {
            Some(tokens) => Ok(builder.header(AUTHORIZATION, tokens.authorization().await?)),
            None => Ok(builder),
        }
    }

    /// Fetch a single media item by id.
    pub async fn get_item(&self, id: &str) -> Result<MediaItem, ApiError> {
        let url = format!("{}/v1/mediaItems/{}", self.base_url, id);
        let response = self.request(Method::GET, &url).await?.send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait::async_trait]
impl LibrarySource for PhotosClient {
    async fn search_page(
        &self,
        request: &SearchRequest,
        page_token: Option<&str>,
    ) -> Result<MediaItemsPage, ApiError> {
        let url = format!("{}/v1/mediaItems:search", self.base_url);
        let mut body = request.clone();
        body.page_token = page_token.map(str::to_owned);
        tracing::trace!(%url, token = ?body.page_token, "search page");
        let response = self
            .request(Method::POST, &url)
            .await?
            .json(&body)
            .send()
            .await?;
        decode(response).await
    }

    async fn albums_page(&self, page_token: Option<&str>) -> Result<AlbumsPage, ApiError> {
        let url = format!("{}/v1/albums", self.base_url);
        let page_size = ALBUM_PAGE_SIZE.to_string();
        let mut query: Vec<(&str, &str)> = vec![("pageSize", page_size.as_str())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response = self
            .request(Method::GET, &url)
            .await?
            .query(&query)
            .send()
            .await?;
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gphotos::{all_albums, search_all};
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn item_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "baseUrl": format!("https://lh3.example/{id}"),
            "mimeType": "image/jpeg",
            "filename": format!("{id}.jpg"),
            "mediaMetadata": {"creationTime": "2023-01-01T00:00:00Z", "photo": {}}
        })
    }

    #[tokio::test]
    async fn test_search_follows_page_tokens() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("POST", "/v1/mediaItems:search")
            .match_body(Matcher::Json(json!({"albumId": "A1", "pageSize": 100})))
            .with_status(200)
            .with_body(
                json!({"mediaItems": [item_json("one")], "nextPageToken": "T2"}).to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("POST", "/v1/mediaItems:search")
            .match_body(Matcher::Json(
                json!({"albumId": "A1", "pageSize": 100, "pageToken": "T2"}),
            ))
            .with_status(200)
            .with_body(json!({"mediaItems": [item_json("two")]}).to_string())
            .create_async()
            .await;

        let client = PhotosClient::with_base_url(Client::new(), server.url());
        let items = search_all(&client, &SearchRequest::album("A1")).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["one", "two"]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_search_page_has_no_items() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/mediaItems:search")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let client = PhotosClient::with_base_url(Client::new(), server.url());
        let page = client
            .search_page(&SearchRequest::favorites(), None)
            .await
            .unwrap();
        assert!(page.media_items.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_non_success_status_carries_body() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/albums")
            .match_query(Matcher::UrlEncoded("pageSize".into(), "50".into()))
            .with_status(403)
            .with_body("insufficient scopes")
            .create_async()
            .await;
        let client = PhotosClient::with_base_url(Client::new(), server.url());
        match client.albums_page(None).await {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "insufficient scopes");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_albums_collects_pages() {
        let mut server = Server::new_async().await;
        let _p1 = server
            .mock("GET", "/v1/albums")
            .match_query(Matcher::Exact("pageSize=50".into()))
            .with_status(200)
            .with_body(
                json!({
                    "albums": [{"id": "a", "title": "First", "mediaItemsCount": "3"}],
                    "nextPageToken": "next"
                })
                .to_string(),
            )
            .create_async()
            .await;
        let _p2 = server
            .mock("GET", "/v1/albums")
            .match_query(Matcher::Exact("pageSize=50&pageToken=next".into()))
            .with_status(200)
            .with_body(json!({"albums": [{"id": "b", "title": "Second"}]}).to_string())
            .create_async()
            .await;
        let client = PhotosClient::with_base_url(Client::new(), server.url());
        let albums = all_albums(&client).await.unwrap();
        assert_eq!(albums.len(), 2);
        assert_eq!(albums[0].total_items(), 3);
        assert_eq!(albums[1].title(), "Second");
    }

    #[tokio::test]
    async fn test_get_item() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/mediaItems/xyz")
            .with_status(200)
            .with_body(item_json("xyz").to_string())
            .create_async()
            .await;
        let client = PhotosClient::with_base_url(Client::new(), format!("{}/", server.url()));
        let item = client.get_item("xyz").await.unwrap();
        assert_eq!(item.filename, "xyz.jpg");
    }

    #[tokio::test]
    async fn test_requests_carry_token_source_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/albums")
            .match_query(mockito::Matcher::Any)
            .match_header("authorization", "Bearer ya29.live")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let token = serde_json::from_str(r#"{"access_token": "ya29.live"}"#).unwrap();
        let tokens = Arc::new(TokenSource::new(token, None, None));
        let client = PhotosClient::with_base_url(Client::new(), server.url()).with_tokens(tokens);

        let page = client.albums_page(None).await.unwrap();
        assert!(page.albums.is_empty());
        mock.assert_async().await;
    }
}
