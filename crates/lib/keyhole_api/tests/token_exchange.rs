//! Integration tests for `POST /token` and `POST /api/token`.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Duration;
use keyhole_core::GatewaySettings;
use keyhole_core::rate_limit::RateLimitPolicy;
use serde_json::json;

use common::{API_KEY, REDIRECT, app, app_with};

#[tokio::test]
async fn code_exchanges_once_then_invalid_grant() {
    let app = app();
    let (user_id, project_id) = app.seed();
    let code = app.issue_code(user_id, project_id).await;
    let body = json!({ "code": code, "redirect_uri": REDIRECT });

    let first = app
        .send(Method::POST, "/token", "203.0.113.1", None, Some(body.clone()))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.json["user"]["id"], user_id.to_string());
    assert_eq!(first.json["project"]["id"], project_id.to_string());
    assert!(first.json["sessionToken"].is_string());
    assert!(
        first.json.get("tokenVersion").is_none(),
        "public exchange must not expose tokenVersion"
    );

    let replay = app
        .send(Method::POST, "/token", "203.0.113.1", None, Some(body))
        .await;
    assert_eq!(replay.status, StatusCode::BAD_REQUEST);
    assert_eq!(replay.json["error"], "invalid_grant");
}

#[tokio::test]
async fn camel_case_parameters_are_accepted() {
    let app = app();
    let (user_id, project_id) = app.seed();
    let code = app.issue_code(user_id, project_id).await;
    let reply = app
        .send(
            Method::POST,
            "/token",
            "203.0.113.2",
            None,
            Some(json!({ "code": code, "redirectUri": REDIRECT })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn missing_parameters_are_bad_requests() {
    let app = app();
    let reply = app
        .send(Method::POST, "/token", "203.0.113.3", None, Some(json!({ "code": "abc" })))
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json["error"], "invalid_request");
}

#[tokio::test]
async fn redirect_mismatch_is_rejected() {
    let app = app();
    let (user_id, project_id) = app.seed();
    let code = app.issue_code(user_id, project_id).await;
    let reply = app
        .send(
            Method::POST,
            "/token",
            "203.0.113.4",
            None,
            Some(json!({ "code": code, "redirect_uri": "https://app.example/elsewhere" })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json["error"], "invalid_grant");
}

#[tokio::test]
async fn expired_code_is_unauthorized_with_same_body() {
    let app = app_with(GatewaySettings {
        sso_code_ttl: Duration::seconds(-1),
        production: true,
        ..Default::default()
    });
    let (user_id, project_id) = app.seed();
    let code = app.issue_code(user_id, project_id).await;
    let expired = app
        .send(
            Method::POST,
            "/token",
            "203.0.113.5",
            None,
            Some(json!({ "code": code, "redirect_uri": REDIRECT })),
        )
        .await;
    let unknown = app
        .send(
            Method::POST,
            "/token",
            "203.0.113.5",
            None,
            Some(json!({ "code": "no-such-code", "redirect_uri": REDIRECT })),
        )
        .await;
    assert_eq!(expired.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    assert_eq!(expired.json, unknown.json);
}

#[tokio::test]
async fn private_project_without_membership_is_forbidden() {
    let app = app();
    let (user_id, project_id) = app.seed();
    let code = app.issue_code(user_id, project_id).await;
    app.store.set_project_public(project_id, false);
    let reply = app
        .send(
            Method::POST,
            "/token",
            "203.0.113.6",
            None,
            Some(json!({ "code": code, "redirect_uri": REDIRECT })),
        )
        .await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.json["error"], "access_denied");
}

#[tokio::test]
async fn rate_limited_exchange_has_retry_after() {
    let mut settings = GatewaySettings {
        production: true,
        ..Default::default()
    };
    settings.rate_limits.token_exchange = RateLimitPolicy::new("token", Duration::minutes(1), 2);
    let app = app_with(settings);
    let body = json!({ "code": "x", "redirect_uri": REDIRECT });

    for _ in 0..2 {
        let reply = app
            .send(Method::POST, "/token", "203.0.113.7", None, Some(body.clone()))
            .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }
    let limited = app
        .send(Method::POST, "/token", "203.0.113.7", None, Some(body.clone()))
        .await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.json["error"], "rate_limited");
    let retry_after: i64 = limited.headers["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    // Other clients are unaffected.
    let other = app
        .send(Method::POST, "/token", "203.0.113.8", None, Some(body))
        .await;
    assert_eq!(other.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn api_exchange_is_project_scoped_and_returns_version() {
    let app = app();
    let (user_id, project_id) = app.seed();
    let other = app.store.add_project("other", None, true, "kh_other_key");
    let code = app.issue_code(user_id, project_id).await;
    let body = json!({ "code": code, "redirect_uri": REDIRECT });

    let wrong_project = app
        .send(Method::POST, "/api/token", "203.0.113.9", Some("kh_other_key"), Some(body.clone()))
        .await;
    assert_eq!(wrong_project.status, StatusCode::BAD_REQUEST);
    assert_eq!(wrong_project.json["error"], "invalid_grant");
    assert_ne!(other.id, project_id);

    let reply = app
        .send(Method::POST, "/api/token", "203.0.113.9", Some(API_KEY), Some(body))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json["tokenVersion"], 0);
    assert!(reply.json["sessionToken"].is_string());
}

#[tokio::test]
async fn api_exchange_requires_valid_key() {
    let app = app();
    app.seed();
    let body = json!({ "code": "x", "redirect_uri": REDIRECT });

    let missing = app
        .send(Method::POST, "/api/token", "203.0.113.10", None, Some(body.clone()))
        .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let wrong = app
        .send(Method::POST, "/api/token", "203.0.113.10", Some("kh_wrong"), Some(body))
        .await;
    assert_eq!(wrong.status, StatusCode::FORBIDDEN);
    assert_eq!(wrong.json["error"], "invalid_api_key");
}
