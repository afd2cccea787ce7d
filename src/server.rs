use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Path, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::IntoResponse,
    routing::{get, post, put},
};
use std::time::{Duration, Instant};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::{
    blog::{BlogDraft, BlogPost, BlogUpdate},
    db,
    error::AppError,
    session::{Credentials, Session},
    state::{AppState, SessionEntry},
};

/// Bearer token lifetime (24 hours, sliding).
const SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the full application: health check, login/logout and the blog collection.
pub fn app(state: AppState) -> Router {
    // CatchPanicLayer is outermost so it recovers from panics anywhere in the stack.
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/api/login", post(post_login))
        .route("/api/logout", post(post_logout))
        .route("/api/blogs", get(list_blogs).post(create_blog))
        .route("/api/blogs/{id}", put(update_blog).delete(delete_blog))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

// ── Auth extractor ────────────────────────────────────────────────────────────

/// The user behind a valid `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = extract_bearer(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("token missing or invalid".into()))?;

        // One write lock for both the validity check and the expiry slide, so a
        // concurrent expiry cannot interleave between them.
        let mut sessions = state.sessions.write().await;
        let user = match sessions.get_mut(&token) {
            Some(entry) if entry.last_seen.elapsed() < SESSION_TTL => {
                entry.last_seen = Instant::now();
                Some(AuthUser {
                    id: entry.user_id,
                    username: entry.username.clone(),
                })
            }
            _ => None,
        };

        match user {
            Some(user) => Ok(user),
            None => {
                sessions.remove(&token);
                Err(AppError::Unauthorized("token missing or invalid".into()))
            }
        }
    }
}

// ── JSON body extractor ───────────────────────────────────────────────────────

/// `Json<T>` whose rejections (bad syntax, missing fields, wrong content type)
/// answer 400 with the usual `{"error": ...}` body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, AppError> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}

// ── Login ─────────────────────────────────────────────────────────────────────

async fn post_login(
    State(state): State<AppState>,
    ApiJson(creds): ApiJson<Credentials>,
) -> Result<Json<Session>, AppError> {
    let Some(user) = db::verify_user(&state.db, &creds.username, &creds.password).await else {
        tracing::info!(username = %creds.username, "Rejected login");
        return Err(AppError::Unauthorized("invalid username or password".into()));
    };

    let token = new_session_token();
    state.sessions.write().await.insert(
        token.clone(),
        SessionEntry {
            user_id: user.id,
            username: user.username.clone(),
            last_seen: Instant::now(),
        },
    );
    tracing::info!(username = %user.username, "User logged in");

    Ok(Json(Session {
        username: user.username,
        token,
        name: user.name,
    }))
}

/// Revoke the presented token. Always succeeds for a valid token.
async fn post_logout(
    State(state): State<AppState>,
    req: Request,
) -> Result<StatusCode, AppError> {
    let token = extract_bearer(req.headers())
        .ok_or_else(|| AppError::Unauthorized("token missing or invalid".into()))?;
    let removed = state.sessions.write().await.remove(&token);

    match removed {
        Some(entry) => {
            tracing::info!(username = %entry.username, "User logged out");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(AppError::Unauthorized("token missing or invalid".into())),
    }
}

// ── Blog collection ───────────────────────────────────────────────────────────

async fn list_blogs(State(state): State<AppState>) -> Result<Json<Vec<BlogPost>>, AppError> {
    Ok(Json(db::list_blogs(&state.db).await?))
}

async fn create_blog(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(draft): ApiJson<BlogDraft>,
) -> Result<impl IntoResponse, AppError> {
    if !draft.is_complete() {
        return Err(AppError::Validation("title, author and url are required".into()));
    }

    let blog = db::insert_blog(&state.db, &draft, user.id).await?;
    tracing::info!(id = %blog.id, owner = %user.username, "Blog created");
    Ok((StatusCode::CREATED, Json(blog)))
}

async fn update_blog(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<BlogUpdate>,
) -> Result<Json<BlogPost>, AppError> {
    if !update.is_complete() {
        return Err(AppError::Validation("title, author and url are required".into()));
    }

    let id = parse_id(&id)?;
    db::replace_blog(&state.db, id, &update)
        .await?
        .map(Json)
        .ok_or_else(blog_not_found)
}

async fn delete_blog(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;

    match db::blog_owner(&state.db, id).await? {
        None => return Err(blog_not_found()),
        Some(Some(owner)) if owner == user.id => {}
        Some(_) => {
            return Err(AppError::Forbidden(
                "only the creator can delete a blog".into(),
            ));
        }
    }

    if !db::delete_blog(&state.db, id).await? {
        return Err(blog_not_found());
    }
    tracing::info!(id, owner = %user.username, "Blog deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// A malformed id can never match a row, so it is reported as not found.
fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse().map_err(|_| blog_not_found())
}

fn blog_not_found() -> AppError {
    AppError::NotFound("blog not found".into())
}

fn new_session_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn setup() -> AppState {
        let pool = db::init_memory_pool().await.unwrap();
        db::add_user(&pool, "root", Some("Superuser"), "sekret").await.unwrap();
        db::add_user(&pool, "other", None, "sekret").await.unwrap();
        AppState::new(pool)
    }

    async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let resp = app(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login(state: &AppState, username: &str) -> String {
        let (status, body) = send(
            state,
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": username, "password": "sekret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    fn draft() -> Value {
        json!({ "title": "Go To Statement", "author": "Dijkstra", "url": "https://example.com/goto" })
    }

    #[tokio::test]
    async fn login_returns_token_and_profile() {
        let state = setup().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": "root", "password": "sekret" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "root");
        assert_eq!(body["name"], "Superuser");
        assert_eq!(body["token"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let state = setup().await;
        let (status, body) = send(
            &state,
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": "root", "password": "nope" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid username or password");
    }

    #[tokio::test]
    async fn create_requires_token() {
        let state = setup().await;
        let (status, _) = send(&state, "POST", "/api/blogs", None, Some(draft())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&state, "POST", "/api/blogs", Some("bogus"), Some(draft())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_assigns_id_and_owner() {
        let state = setup().await;
        let token = login(&state, "root").await;

        let (status, body) = send(&state, "POST", "/api/blogs", Some(&token), Some(draft())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["id"].is_string());
        assert_eq!(body["likes"], 0);
        assert_eq!(body["owner"]["username"], "root");
        assert!(body.get("version").is_none());

        let (_, list) = send(&state, "GET", "/api/blogs", None, None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_with_missing_url_is_bad_request() {
        let state = setup().await;
        let token = login(&state, "root").await;
        let body = json!({ "title": "T", "author": "A", "url": "" });

        let (status, _) = send(&state, "POST", "/api/blogs", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_without_url_key_is_json_bad_request() {
        let state = setup().await;
        let token = login(&state, "root").await;
        let body = json!({ "title": "T", "author": "A" });

        let (status, body) = send(&state, "POST", "/api/blogs", Some(&token), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("url"), "{body}");
    }

    #[tokio::test]
    async fn malformed_login_body_is_json_bad_request() {
        let state = setup().await;
        let (status, body) =
            send(&state, "POST", "/api/login", None, Some(json!({ "username": "root" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let state = setup().await;
        let token = login(&state, "root").await;

        let (status, _) = send(&state, "POST", "/api/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.sessions.read().await.is_empty());

        let (status, _) = send(&state, "POST", "/api/blogs", Some(&token), Some(draft())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&state, "POST", "/api/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn update_replaces_record() {
        let state = setup().await;
        let token = login(&state, "root").await;
        let (_, created) = send(&state, "POST", "/api/blogs", Some(&token), Some(draft())).await;
        let id = created["id"].as_str().unwrap();

        let mut record = created.clone();
        record["likes"] = json!(1);
        record["important"] = json!(true);
        let (status, body) =
            send(&state, "PUT", &format!("/api/blogs/{id}"), None, Some(record)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["likes"], 1);
        assert_eq!(body["important"], true);
        assert_eq!(body["owner"]["username"], "root");
    }

    #[tokio::test]
    async fn update_of_unknown_id_is_not_found() {
        let state = setup().await;
        let record = json!({ "title": "T", "author": "A", "url": "U", "likes": 1 });

        let (status, _) = send(&state, "PUT", "/api/blogs/999", None, Some(record.clone())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&state, "PUT", "/api/blogs/abc", None, Some(record)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn only_owner_may_delete() {
        let state = setup().await;
        let owner = login(&state, "root").await;
        let intruder = login(&state, "other").await;
        let (_, created) = send(&state, "POST", "/api/blogs", Some(&owner), Some(draft())).await;
        let uri = format!("/api/blogs/{}", created["id"].as_str().unwrap());

        let (status, _) = send(&state, "DELETE", &uri, Some(&intruder), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&state, "DELETE", &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&state, "DELETE", &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(extract_bearer(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, "bearer  xyz ".parse().unwrap());
        assert_eq!(extract_bearer(&headers).as_deref(), Some("xyz"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(extract_bearer(&headers), None);
    }
}
