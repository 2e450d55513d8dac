#![cfg(feature = "web")]

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ed_dash::config::Config;
use ed_dash::supabase::SupabaseGateway;
use ed_dash::{DirectiveId, DirectivePatch, Gateway, GatewayError, NewDirective, Status};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

const TABLE: &str = "directives";

/// Scripted stand-in for the auth and REST services
#[derive(Default)]
struct Mock {
    expires_in: i64,
    refresh_ok: bool,
    forbid_writes: bool,
    calls: Mutex<Vec<String>>,
    bodies: Mutex<Vec<Value>>,
}

impl Mock {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn grant(token: &str, expires_in: i64) -> Value {
    json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": expires_in,
        "refresh_token": format!("refresh-{}", token),
        "user": { "id": "u-1", "email": "admin@ed.kr", "role": "authenticated" }
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn token(
    State(mock): State<Arc<Mock>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let grant_type = query.get("grant_type").cloned().unwrap_or_default();
    mock.calls.lock().unwrap().push(format!("token {}", grant_type));
    if header_value(&headers, "apikey") != "anon" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "No API key found in request" })),
        )
            .into_response();
    }

    match grant_type.as_str() {
        "password" if body["email"] == "admin@ed.kr" && body["password"] == "secret1" => {
            Json(grant("jwt-1", mock.expires_in)).into_response()
        }
        "refresh_token" if mock.refresh_ok && body["refresh_token"] == "refresh-jwt-1" => {
            Json(grant("jwt-2", 3600)).into_response()
        }
        "refresh_token" => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid Refresh Token: Refresh Token Not Found"
            })),
        )
            .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })),
        )
            .into_response(),
    }
}

async fn signup(Json(body): Json<Value>) -> Response {
    if body["password"].as_str().unwrap_or_default().len() < 6 {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "code": 422, "msg": "Password should be at least 6 characters." })),
        )
            .into_response();
    }
    // confirmation pending: the user object alone, no tokens
    Json(json!({ "id": "u-2", "email": body["email"] })).into_response()
}

async fn rest(
    State(mock): State<Arc<Mock>>,
    method: Method,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.calls.lock().unwrap().push(format!(
        "{} id={} auth={} prefer={}",
        method,
        query.get("id").cloned().unwrap_or_default(),
        header_value(&headers, "authorization"),
        header_value(&headers, "prefer"),
    ));
    if !body.is_empty() {
        mock.bodies
            .lock()
            .unwrap()
            .push(serde_json::from_slice(&body).unwrap());
    }
    if mock.forbid_writes && method != Method::GET {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "code": "42501",
                "message": "new row violates row-level security policy"
            })),
        )
            .into_response();
    }

    if method == Method::GET {
        Json(json!([
            {
                "id": 5,
                "serial_no": "2024-1",
                "task": "현장 점검",
                "dept": "안전팀",
                "progress": 95,
                "status": "이행완료",
                "created_at": "2024-01-04T09:00:00+00:00"
            }
        ]))
        .into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn spawn(mock: Mock) -> (Arc<Mock>, SupabaseGateway) {
    let mock = Arc::new(mock);
    let router = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/logout", post(|| async { StatusCode::NO_CONTENT }))
        .route(
            "/rest/v1/directives",
            get(rest).post(rest).patch(rest).delete(rest),
        )
        .with_state(mock.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let gateway = SupabaseGateway::new(&Config::new(format!("http://{}/", addr), "anon"));
    (mock, gateway)
}

fn mock() -> Mock {
    Mock {
        expires_in: 3600,
        refresh_ok: true,
        ..Mock::default()
    }
}

#[tokio::test]
async fn sign_in_then_list_uses_the_access_token() {
    let (mock, gateway) = spawn(mock()).await;
    let mut subscription = gateway.on_session_change();
    gateway.sign_in("admin@ed.kr", "secret1").await.unwrap();

    let session = subscription.take_change().unwrap().unwrap();
    assert_eq!(session.user.email.as_deref(), Some("admin@ed.kr"));

    let rows = gateway.list_all(TABLE).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, DirectiveId::new("5"));
    assert_eq!(rows[0].status, Some(Status::Done));
    assert!(
        mock.calls()
            .iter()
            .any(|c| c.starts_with("GET") && c.contains("auth=Bearer jwt-1"))
    );
}

#[tokio::test]
async fn rejected_credentials_carry_the_service_message() {
    let (_mock, gateway) = spawn(mock()).await;
    let err = gateway.sign_in("admin@ed.kr", "nope").await.unwrap_err();
    assert_eq!(err.message, "Invalid login credentials");
    assert!(gateway.get_session().await.is_none());
}

#[tokio::test]
async fn sign_up_without_tokens_leaves_no_session() {
    let (_mock, gateway) = spawn(mock()).await;
    gateway.sign_up("new@ed.kr", "abcdef").await.unwrap();
    assert!(gateway.get_session().await.is_none());

    let err = gateway.sign_up("new@ed.kr", "abc").await.unwrap_err();
    assert_eq!(err.message, "Password should be at least 6 characters.");
}

#[tokio::test]
async fn writes_target_the_row_by_id() {
    let (mock, gateway) = spawn(mock()).await;
    gateway.sign_in("admin@ed.kr", "secret1").await.unwrap();

    let record = NewDirective::new(
        "2024-2".to_string(),
        "예산 검토".to_string(),
        "기획팀".to_string(),
        30,
    );
    gateway.insert(TABLE, &record).await.unwrap();
    let patch = DirectivePatch::new("예산 재검토".to_string(), "기획팀".to_string(), 90);
    gateway
        .update(TABLE, &DirectiveId::new("5"), &patch)
        .await
        .unwrap();
    gateway.delete(TABLE, &DirectiveId::new("5")).await.unwrap();

    let calls = mock.calls();
    assert!(calls.iter().any(|c| c.starts_with("POST") && c.contains("prefer=return=minimal")));
    assert!(calls.iter().any(|c| c.starts_with("PATCH id=eq.5")));
    assert!(calls.iter().any(|c| c.starts_with("DELETE id=eq.5")));

    let bodies = mock.bodies.lock().unwrap().clone();
    assert_eq!(bodies[0][0]["serial_no"], "2024-2");
    assert_eq!(bodies[0][0]["status"], "진행중");
    assert_eq!(bodies[1]["status"], "이행완료");
}

#[tokio::test]
async fn rejected_write_keeps_status_and_message() {
    let (_mock, gateway) = spawn(Mock {
        forbid_writes: true,
        ..mock()
    })
    .await;
    gateway.sign_in("admin@ed.kr", "secret1").await.unwrap();

    let err = gateway
        .delete(TABLE, &DirectiveId::new("5"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::Rejected {
            status: 403,
            message: "new row violates row-level security policy".to_string(),
        }
    );
}

#[tokio::test]
async fn expiring_token_is_refreshed_first() {
    let (mock, gateway) = spawn(Mock {
        expires_in: 10,
        ..mock()
    })
    .await;
    gateway.sign_in("admin@ed.kr", "secret1").await.unwrap();

    gateway.list_all(TABLE).await.unwrap();

    let calls = mock.calls();
    assert!(calls.contains(&"token refresh_token".to_string()));
    assert!(
        calls
            .iter()
            .any(|c| c.starts_with("GET") && c.contains("auth=Bearer jwt-2"))
    );
    assert_eq!(gateway.get_session().await.unwrap().access_token, "jwt-2");
}

#[tokio::test]
async fn failed_refresh_ends_the_session() {
    let (_mock, gateway) = spawn(Mock {
        expires_in: 10,
        refresh_ok: false,
        ..mock()
    })
    .await;
    gateway.sign_in("admin@ed.kr", "secret1").await.unwrap();
    let mut subscription = gateway.on_session_change();

    let err = gateway.list_all(TABLE).await.unwrap_err();
    assert_eq!(err, GatewayError::NoSession);
    assert_eq!(subscription.take_change(), Some(None));
}

#[tokio::test]
async fn sign_out_clears_the_session() {
    let (_mock, gateway) = spawn(mock()).await;
    gateway.sign_in("admin@ed.kr", "secret1").await.unwrap();
    gateway.sign_out().await;
    assert!(gateway.get_session().await.is_none());
}
