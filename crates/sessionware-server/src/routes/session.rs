//! Session inspection and mutation routes.

use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Map, Value};
use sessionware_core::{Error, SessionHandle};
use std::sync::Arc;

use crate::state::AppState;

/// Create session router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/session",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/session/save", post(save_session))
        .route("/session/regenerate", post(regenerate_session))
        .route("/views", get(count_views))
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub exists: bool,
    pub is_new: bool,
    pub data: Value,
    pub external_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ViewCount {
    pub views: u64,
}

async fn view(session: &SessionHandle) -> SessionView {
    let current = session.session().await;
    SessionView {
        exists: current.is_some(),
        is_new: current.as_ref().is_some_and(|s| s.is_new()),
        data: current.map(|s| s.to_json()).unwrap_or(Value::Null),
        external_key: session.external_key().await,
    }
}

/// Show the current session
pub async fn get_session(session: SessionHandle) -> Json<SessionView> {
    Json(view(&session).await)
}

/// Merge a JSON object into the session
pub async fn update_session(
    session: SessionHandle,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<SessionView>, (StatusCode, String)> {
    if let Some(key) = body.keys().find(|k| k.starts_with('_')) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Key {key:?} is reserved for session metadata"),
        ));
    }

    session
        .update(|s| {
            for (key, value) in body {
                s.insert_value(key, value);
            }
        })
        .await;

    Ok(Json(view(&session).await))
}

/// Delete the session and expire its cookie
pub async fn delete_session(session: SessionHandle) -> StatusCode {
    session.clear().await;
    StatusCode::NO_CONTENT
}

/// Save the session even if nothing changed
pub async fn save_session(session: SessionHandle) -> Json<SessionView> {
    session.save().await;
    Json(view(&session).await)
}

/// Keep nothing, start over under a new key
pub async fn regenerate_session(session: SessionHandle) -> Result<Json<SessionView>, Error> {
    session.regenerate().await?;
    Ok(Json(view(&session).await))
}

/// Increment and return the per-session view counter
pub async fn count_views(session: SessionHandle) -> Result<Json<ViewCount>, Error> {
    let views = session.get::<u64>("views").await.unwrap_or(0) + 1;
    session.insert("views", views).await?;
    Ok(Json(ViewCount { views }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::routes::create_router;
    use axum::{
        body::Body,
        http::{
            Request,
            header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        },
        response::Response,
    };
    use http_body_util::BodyExt;
    use serde_json::json;
    use sessionware_core::{MemoryStore, SessionOptions, SessionStore};
    use tower::ServiceExt;

    fn cookie_app() -> Router {
        let options = SessionOptions::new().with_random_secret().build().unwrap();
        create_router(AppState::new(Config::default(), options))
    }

    fn store_app(store: Arc<MemoryStore>) -> Router {
        let options = SessionOptions::new()
            .with_random_secret()
            .with_shared_store(store as Arc<dyn SessionStore>)
            .build()
            .unwrap();
        create_router(AppState::new(Config::default(), options))
    }

    fn request(
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    // `name=value` of the first Set-Cookie header
    fn session_cookie(response: &Response) -> Option<String> {
        let header = response.headers().get(SET_COOKIE)?.to_str().ok()?;
        header.split(';').next().map(str::to_string)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_has_no_session() {
        let response = cookie_app()
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_none());

        let body = body_json(response).await;
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["session"]["key"], json!("session"));
    }

    #[tokio::test]
    async fn test_views_increment() {
        let app = cookie_app();

        let response = app
            .clone()
            .oneshot(request("GET", "/api/views", None, None))
            .await
            .unwrap();
        let cookie = session_cookie(&response).unwrap();
        assert_eq!(body_json(response).await, json!({"views": 1}));

        let response = app
            .oneshot(request("GET", "/api/views", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(body_json(response).await, json!({"views": 2}));
    }

    #[tokio::test]
    async fn test_get_without_session() {
        let response = cookie_app()
            .oneshot(request("GET", "/api/session", None, None))
            .await
            .unwrap();
        assert!(response.headers().get(SET_COOKIE).is_none());

        let body = body_json(response).await;
        assert_eq!(body["exists"], json!(false));
        assert_eq!(body["data"], Value::Null);
    }

    #[tokio::test]
    async fn test_put_merges_and_delete_expires() {
        let app = cookie_app();

        let response = app
            .clone()
            .oneshot(request("PUT", "/api/session", None, Some(json!({"user": "alice"}))))
            .await
            .unwrap();
        let cookie = session_cookie(&response).unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"], json!({"user": "alice"}));
        assert_eq!(body["is_new"], json!(true));

        let response = app
            .clone()
            .oneshot(request("PUT", "/api/session", Some(&cookie), Some(json!({"theme": "dark"}))))
            .await
            .unwrap();
        let cookie = session_cookie(&response).unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"], json!({"user": "alice", "theme": "dark"}));
        assert_eq!(body["is_new"], json!(false));

        let response = app
            .oneshot(request("DELETE", "/api/session", Some(&cookie), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(session_cookie(&response).as_deref(), Some("session="));
    }

    #[tokio::test]
    async fn test_put_rejects_reserved_keys() {
        let response = cookie_app()
            .oneshot(request("PUT", "/api/session", None, Some(json!({"_expire": 0}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_save_rewrites_unchanged_session() {
        let app = cookie_app();

        let response = app
            .clone()
            .oneshot(request("PUT", "/api/session", None, Some(json!({"a": 1}))))
            .await
            .unwrap();
        let cookie = session_cookie(&response).unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", "/api/session", Some(&cookie), None))
            .await
            .unwrap();
        assert!(response.headers().get(SET_COOKIE).is_none());

        let response = app
            .oneshot(request("POST", "/api/session/save", Some(&cookie), None))
            .await
            .unwrap();
        assert!(session_cookie(&response).is_some());
    }

    #[tokio::test]
    async fn test_regenerate_replaces_store_entry() {
        let store = Arc::new(MemoryStore::new());
        let app = store_app(Arc::clone(&store));

        let response = app
            .clone()
            .oneshot(request("PUT", "/api/session", None, Some(json!({"user": "alice"}))))
            .await
            .unwrap();
        let cookie = session_cookie(&response).unwrap();
        assert_eq!(store.len().await, 1);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/session", Some(&cookie), None))
            .await
            .unwrap();
        assert!(body_json(response).await["external_key"].is_string());

        let response = app
            .oneshot(request("POST", "/api/session/regenerate", Some(&cookie), None))
            .await
            .unwrap();
        // The empty replacement is not stored, so the old cookie is cleared
        assert_eq!(session_cookie(&response).as_deref(), Some("session="));
        let body = body_json(response).await;
        assert_eq!(body["data"], json!({}));
        assert_eq!(body["external_key"], Value::Null);
        assert!(store.is_empty().await);
    }
}
