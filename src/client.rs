use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::{
    blog::{BlogDraft, BlogPost},
    error::ClientError,
    session::{Credentials, Session},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-call request context carrying the bearer credential, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    token: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// No validation; the backend decides whether the token is any good.
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// The backend operations the application controller depends on.
#[async_trait]
pub trait BlogApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<Session, ClientError>;

    /// Revoke the context's token on the backend.
    async fn logout(&self, ctx: &RequestContext) -> Result<(), ClientError>;

    async fn get_all(&self, ctx: &RequestContext) -> Result<Vec<BlogPost>, ClientError>;

    async fn create(&self, ctx: &RequestContext, draft: &BlogDraft)
    -> Result<BlogPost, ClientError>;

    /// Full-record replace.
    async fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        record: &BlogPost,
    ) -> Result<BlogPost, ClientError>;

    async fn blog_delete(&self, ctx: &RequestContext, id: &str) -> Result<(), ClientError>;
}

/// JSON-over-HTTP client for the blog collection and login endpoints.
#[derive(Clone)]
pub struct BlogService {
    http: reqwest::Client,
    base_url: String,
}

impl BlogService {
    /// `base_url` is the server origin, e.g. `http://localhost:3003`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn blogs_url(&self) -> String {
        format!("{}/api/blogs", self.base_url)
    }

    fn blog_url(&self, id: &str) -> String {
        format!("{}/api/blogs/{}", self.base_url, id)
    }
}

#[async_trait]
impl BlogApi for BlogService {
    async fn login(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        let resp = self
            .http
            .post(format!("{}/api/login", self.base_url))
            .json(credentials)
            .send()
            .await?;
        decode(resp).await
    }

    async fn logout(&self, ctx: &RequestContext) -> Result<(), ClientError> {
        let resp = ctx
            .authorize(self.http.post(format!("{}/api/logout", self.base_url)))
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }

    async fn get_all(&self, ctx: &RequestContext) -> Result<Vec<BlogPost>, ClientError> {
        let resp = ctx.authorize(self.http.get(self.blogs_url())).send().await?;
        decode(resp).await
    }

    async fn create(
        &self,
        ctx: &RequestContext,
        draft: &BlogDraft,
    ) -> Result<BlogPost, ClientError> {
        let resp = ctx
            .authorize(self.http.post(self.blogs_url()))
            .json(draft)
            .send()
            .await?;
        decode(resp).await
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        id: &str,
        record: &BlogPost,
    ) -> Result<BlogPost, ClientError> {
        let resp = ctx
            .authorize(self.http.put(self.blog_url(id)))
            .json(record)
            .send()
            .await?;
        decode(resp).await
    }

    async fn blog_delete(&self, ctx: &RequestContext, id: &str) -> Result<(), ClientError> {
        let resp = ctx
            .authorize(self.http.delete(self.blog_url(id)))
            .send()
            .await?;
        check_status(resp).await.map(|_| ())
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let resp = check_status(resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| ClientError::Request(format!("invalid response body: {e}")))
}

/// Turn a non-2xx response into the matching [`ClientError`], using the
/// backend's `{"error": "..."}` message when present.
async fn check_status(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.to_string()
            } else {
                text.trim().to_string()
            }
        });

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ClientError::Validation(detail)
        }
        StatusCode::NOT_FOUND => ClientError::NotFound(detail),
        _ => ClientError::Request(format!("{status}: {detail}")),
    })
}
