use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth, config::AppConfig, state::AppState};

pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config)?;
    let body_limit = state.config.max_body_bytes;

    Ok(Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = res.status();
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        ))
}

fn cors_layer(config: &AppConfig) -> anyhow::Result<CorsLayer> {
    let origin: HeaderValue = config
        .frontend_url
        .parse()
        .with_context(|| format!("invalid FRONTEND_URL {:?}", config.frontend_url))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]))
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("API is running on http://{}/api", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::repo::{memory::MemoryUserStore, UserStore};

    fn test_app() -> (Router, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::default());
        let state = AppState::from_parts(
            Arc::new(AppConfig::for_tests()),
            store.clone() as Arc<dyn UserStore>,
        );
        (build_app(state).expect("app builds"), store)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_me(token: Option<&str>) -> Request<Body> {
        let mut req = Request::get("/api/auth/me");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        req.body(Body::empty()).unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn registration() -> Value {
        json!({
            "email": "a@b.com",
            "password": "longenough1",
            "firstName": "A",
            "lastName": "B"
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _) = test_app();
        let res = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_login_and_me_flow() {
        let (app, _) = test_app();

        let res = app
            .clone()
            .oneshot(post_json("/api/auth/register", registration()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = json_body(res).await;
        assert_eq!(body["user"]["email"], "a@b.com");
        assert!(body["user"].get("passwordHash").is_none());
        assert!(body["user"].get("deletedAt").is_none());
        let user_id = body["user"]["id"].clone();

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": "a@b.com", "password": "longenough1" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["user"]["id"], user_id);
        let token = body["token"].as_str().unwrap().to_string();

        let res = app.oneshot(get_me(Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["id"], user_id);
        assert_eq!(body["firstName"], "A");
        assert!(body.get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn duplicate_register_is_conflict() {
        let (app, store) = test_app();
        let first = app
            .clone()
            .oneshot(post_json("/api/auth/register", registration()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = app
            .oneshot(post_json("/api/auth/register", registration()))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(
            json_body(second).await["error"],
            "User with this email already exists"
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn register_validation_errors() {
        let (app, store) = test_app();

        let mut short = registration();
        short["password"] = json!("short");
        let res = app
            .clone()
            .oneshot(post_json("/api/auth/register", short))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let mut extra = registration();
        extra["isActive"] = json!(false);
        let res = app
            .clone()
            .oneshot(post_json("/api/auth/register", extra))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(res).await["error"].is_string());

        let mut missing = registration();
        missing.as_object_mut().unwrap().remove("lastName");
        let res = app
            .clone()
            .oneshot(post_json("/api/auth/register", missing))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(res).await["error"].is_string());

        let malformed = Request::post("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"email\": "))
            .unwrap();
        let res = app.oneshot(malformed).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(res).await["error"].is_string());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn login_failures_are_unauthorized() {
        let (app, _) = test_app();
        app.clone()
            .oneshot(post_json("/api/auth/register", registration()))
            .await
            .unwrap();

        let res = app
            .oneshot(post_json(
                "/api/auth/login",
                json!({ "email": "a@b.com", "password": "wrong-password" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"], "Invalid credentials");
    }

    #[tokio::test]
    async fn me_requires_valid_token_and_active_user() {
        let (app, store) = test_app();

        let res = app.clone().oneshot(get_me(None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app.clone().oneshot(get_me(Some("garbage"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .clone()
            .oneshot(post_json("/api/auth/register", registration()))
            .await
            .unwrap();
        let body = json_body(res).await;
        let token = body["token"].as_str().unwrap().to_string();

        store.set_active(store.first().unwrap().id, false);
        let res = app.oneshot(get_me(Some(&token))).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"], "User not found or inactive");
    }

    #[tokio::test]
    async fn cors_allows_frontend_origin_with_credentials() {
        let (app, _) = test_app();
        let res = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/auth/login")
                    .header(header::ORIGIN, "http://localhost:3001")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let headers = res.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3001"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }
}
