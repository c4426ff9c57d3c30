//! axum integration.
//!
//! Install [`session_middleware`] with `axum::middleware::from_fn_with_state`
//! and take a [`SessionHandle`] in handlers:
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/views", get(views))
//!     .layer(middleware::from_fn_with_state(options, session_middleware));
//!
//! async fn views(session: SessionHandle) -> Result<String, Error> {
//!     let views = session.get::<u64>("views").await.unwrap_or(0) + 1;
//!     session.insert("views", views).await?;
//!     Ok(views.to_string())
//! }
//! ```

use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, State},
    http::{
        HeaderMap, HeaderValue, Request, StatusCode,
        header::{COOKIE, SET_COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use cookie::Cookie;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

use crate::cookies::RequestCookies;
use crate::error::{Error, Result};
use crate::options::{MaxAge, SessionOptions};
use crate::session::{CommitOutcome, Session, SessionLifecycle};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Session middleware for axum.
///
/// The session is committed after the inner service finishes, whether it
/// returned normally or panicked. A panic is resumed once the commit is done.
pub async fn session_middleware(
    State(options): State<Arc<SessionOptions>>,
    mut request: Request<Body>,
    next: Next,
) -> std::result::Result<Response, Error> {
    let cookies = RequestCookies::parse(
        request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    );

    let mut lifecycle = SessionLifecycle::new(Arc::clone(&options), cookies);
    if options.store().is_some() {
        lifecycle.load().await;
    }

    let handle = SessionHandle::new(lifecycle);
    request.extensions_mut().insert(handle.clone());

    let outcome = AssertUnwindSafe(next.run(request)).catch_unwind().await;

    let committed = if options.auto_commit {
        handle.commit().await.map(|_| ())
    } else {
        Ok(())
    };
    let cookies = handle.take_cookies().await;

    match outcome {
        Ok(mut response) => {
            committed?;
            apply_cookies(response.headers_mut(), &cookies, options.overwrite)?;
            Ok(response)
        }
        Err(panic) => {
            if let Err(err) = committed {
                error!(error = %err, "session commit failed after handler panic");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Write queued cookies as `Set-Cookie` headers
fn apply_cookies(
    headers: &mut HeaderMap,
    cookies: &[Cookie<'static>],
    overwrite: bool,
) -> Result<()> {
    for cookie in cookies {
        if overwrite {
            remove_set_cookie(headers, cookie.name());
        }
        let value = HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| Error::InvalidHeader(e.to_string()))?;
        headers.append(SET_COOKIE, value);
    }
    Ok(())
}

// Drop earlier Set-Cookie headers for `name`, keeping the rest in order
fn remove_set_cookie(headers: &mut HeaderMap, name: &str) {
    let prefix = format!("{name}=");
    let kept: Vec<HeaderValue> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter(|value| !value.to_str().is_ok_and(|s| s.starts_with(&prefix)))
        .cloned()
        .collect();

    headers.remove(SET_COOKIE);
    for value in kept {
        headers.append(SET_COOKIE, value);
    }
}

/// Handle to the request's session, extracted in handlers.
///
/// Clones share the same underlying session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionLifecycle>>,
    options: Arc<SessionOptions>,
}

impl SessionHandle {
    fn new(lifecycle: SessionLifecycle) -> Self {
        let options = Arc::clone(lifecycle.options());
        Self {
            inner: Arc::new(Mutex::new(lifecycle)),
            options,
        }
    }

    /// Options the middleware was installed with
    pub fn options(&self) -> &Arc<SessionOptions> {
        &self.options
    }

    /// Whether a session exists for this request
    pub async fn exists(&self) -> bool {
        self.inner.lock().await.get().await.is_some()
    }

    /// Copy of the current session, `None` if there is none
    pub async fn session(&self) -> Option<Session> {
        self.inner.lock().await.get().await.cloned()
    }

    /// Get a typed value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner.lock().await.get().await.and_then(|s| s.get(key))
    }

    /// Get a raw JSON value
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .await
            .get()
            .await
            .and_then(|s| s.get_value(key).cloned())
    }

    /// Insert a typed value, creating the session if needed
    pub async fn insert<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>> {
        let mut lifecycle = self.inner.lock().await;
        lifecycle.get_or_create().await.insert(key, value)
    }

    /// Remove a key from an existing session
    pub async fn remove(&self, key: &str) -> Option<Value> {
        let mut lifecycle = self.inner.lock().await;
        lifecycle.get_mut().await.and_then(|s| s.remove(key))
    }

    /// Mutate the session in place, creating it if needed
    pub async fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut lifecycle = self.inner.lock().await;
        f(lifecycle.get_or_create().await)
    }

    /// Replace the session; `None` deletes it at commit
    pub async fn set(&self, session: Option<Session>) {
        self.inner.lock().await.set(session).await;
    }

    /// Delete the session at commit
    pub async fn clear(&self) {
        self.set(None).await;
    }

    /// Force a save at commit
    pub async fn save(&self) {
        let mut lifecycle = self.inner.lock().await;
        lifecycle.get_or_create().await.save();
    }

    /// Override the lifetime for this session
    pub async fn set_max_age(&self, max_age: MaxAge) {
        let mut lifecycle = self.inner.lock().await;
        lifecycle.get_or_create().await.set_max_age(max_age);
    }

    /// Start a fresh session under a new key
    pub async fn regenerate(&self) -> Result<()> {
        self.inner.lock().await.regenerate().await
    }

    /// Commit now; the middleware's own commit then does nothing
    pub async fn commit(&self) -> Result<CommitOutcome> {
        self.inner.lock().await.commit().await
    }

    /// External key of the stored session, store mode only
    pub async fn external_key(&self) -> Option<String> {
        self.inner.lock().await.external_key().map(str::to_string)
    }

    async fn take_cookies(&self) -> Vec<Cookie<'static>> {
        self.inner.lock().await.take_cookies()
    }
}

impl<S> FromRequestParts<S> for SessionHandle
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .ok_or(Error::MissingLayer)
    }
}
