mod common;

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::json;
use storefront_core::api::{ApiError, ApiRequest, RequestBody, TransportError};
use storefront_core::auth::Credential;

use common::*;

#[tokio::test]
async fn test_expired_token_is_refreshed_before_send() {
    let transport = ScriptedTransport::new();
    // Expired a second ago
    let stale = jwt_expiring_in(-1);
    let fresh = jwt_expiring_in(3600);
    let ctx = context(&transport, Some(Credential::new(stale.clone(), Some("refresh-1".into()))));

    transport.push_refresh(refresh_ok(&fresh));
    transport.push(ok_json(r#"{"success":true,"data":[]}"#));

    let response = ctx.pipeline().send(ApiRequest::get("/orders")).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].url.ends_with("/vendors/auth/refresh"));
    assert_eq!(requests[0].body, RequestBody::Json(json!({"refresh_token": "refresh-1"})));
    assert_eq!(requests[1].url, format!("{}/orders", API_BASE));
    assert_eq!(requests[1].bearer.as_deref(), Some(fresh.as_str()));

    assert_eq!(ctx.credentials().refresh_token().as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn test_unauthorized_refreshes_and_resends_once() {
    let transport = ScriptedTransport::new();
    let first = jwt_expiring_in(3600);
    let second = jwt_expiring_in(7200);
    let ctx = context(&transport, Some(Credential::new(first.clone(), Some("refresh-1".into()))));

    transport.push(respond(StatusCode::UNAUTHORIZED, r#"{"message":"jwt revoked"}"#));
    transport.push_refresh(refresh_ok(&second));
    transport.push(ok_json(r#"{"success":true,"data":{"id":1}}"#));

    let response = ctx.pipeline().send(ApiRequest::get("/products/1")).await.unwrap();
    assert_eq!(response.body["data"]["id"], 1);

    assert_eq!(transport.refresh_calls(), 1);
    let calls = transport.api_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].bearer.as_deref(), Some(first.as_str()));
    assert_eq!(calls[1].bearer.as_deref(), Some(second.as_str()));
    assert_eq!(calls[1].method, Method::GET);
}

#[tokio::test]
async fn test_second_unauthorized_ends_session() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(3600), Some("refresh-1".into()))));

    transport.push(respond(StatusCode::UNAUTHORIZED, "{}"));
    transport.push_refresh(refresh_ok(&jwt_expiring_in(3600)));
    transport.push(respond(StatusCode::UNAUTHORIZED, r#"{"message":"still no"}"#));
    transport.push(ok_json("{}"));

    let err = ctx.pipeline().send(ApiRequest::get("/orders")).await.unwrap_err();
    assert!(matches!(err, ApiError::UnauthorizedRetryExhausted { .. }));
    assert!(err.is_session_ended());

    assert_eq!(transport.api_calls().len(), 2);
    assert_eq!(transport.refresh_calls(), 1);
    assert!(ctx.credentials().get().is_empty());
}

#[tokio::test]
async fn test_retry_error_status_ends_session() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(3600), Some("refresh-1".into()))));

    transport.push(respond(StatusCode::UNAUTHORIZED, "{}"));
    transport.push_refresh(refresh_ok(&jwt_expiring_in(3600)));
    transport.push(respond(StatusCode::INTERNAL_SERVER_ERROR, r#"{"message":"db down"}"#));

    let err = ctx.pipeline().send(ApiRequest::get("/orders")).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(err.server_message(), Some("db down"));
    assert_eq!(transport.api_calls().len(), 2);
    assert!(ctx.credentials().get().is_empty());
}

#[tokio::test]
async fn test_retry_transport_error_ends_session() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(3600), Some("refresh-1".into()))));

    transport.push(respond(StatusCode::UNAUTHORIZED, "{}"));
    transport.push_refresh(refresh_ok(&jwt_expiring_in(3600)));
    transport.push(Err(TransportError::InvalidRequest("connection reset".into())));

    let err = ctx.pipeline().send(ApiRequest::get("/orders")).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(TransportError::InvalidRequest(_))));
    assert_eq!(transport.refresh_calls(), 1);
    assert!(ctx.credentials().get().is_empty());
}

#[test]
fn test_unencodable_body_is_rejected_before_send() {
    // Map keys must be strings in JSON
    let body: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
    let err = ApiRequest::post("/products").json(&body).unwrap_err();
    assert!(matches!(err, ApiError::Serialize(_)));
    assert!(!err.is_session_ended());
}

#[tokio::test]
async fn test_failed_refresh_aborts_request() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(-30), Some("refresh-1".into()))));
    transport.push_refresh(respond(StatusCode::FORBIDDEN, r#"{"message":"refresh token revoked"}"#));

    let err = ctx.pipeline().send(ApiRequest::get("/orders")).await.unwrap_err();
    assert!(matches!(err, ApiError::Refresh(_)));
    assert!(transport.api_calls().is_empty());
    assert!(ctx.credentials().get().is_empty());
}

#[tokio::test]
async fn test_expired_without_refresh_token_is_auth_expired() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(-30), None)));

    let err = ctx.pipeline().send(ApiRequest::get("/orders")).await.unwrap_err();
    assert!(matches!(err, ApiError::AuthExpired));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_response_bodies_are_normalized() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(3600), Some("r".into()))));
    let envelope = cipher().encrypt(&json!({"success": true, "data": {"total": 12}})).unwrap();

    transport.push(ok_json(&envelope));
    transport.push(ok_json(r#"{"success":true,"data":"plain"}"#));
    transport.push(ok_json("<html>maintenance</html>"));
    transport.push(ok_json(""));

    let pipeline = ctx.pipeline();
    let decrypted = pipeline.send(ApiRequest::get("/analytics/salesreport")).await.unwrap();
    assert_eq!(decrypted.body["data"]["total"], 12);

    let plain = pipeline.send(ApiRequest::get("/orders")).await.unwrap();
    assert_eq!(plain.body["data"], "plain");

    let raw = pipeline.send(ApiRequest::get("/orders")).await.unwrap();
    assert_eq!(raw.body, json!("<html>maintenance</html>"));

    let empty = pipeline.send(ApiRequest::get("/orders")).await.unwrap();
    assert_eq!(empty.body, json!(""));
}

#[tokio::test]
async fn test_error_bodies_are_decrypted_too() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(3600), Some("r".into()))));
    let envelope = cipher().encrypt(&json!({"success": false, "message": "Product not found"})).unwrap();
    transport.push(respond(StatusCode::NOT_FOUND, envelope));

    let err = ctx.pipeline().send(ApiRequest::get("/products/99")).await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.server_message(), Some("Product not found"));
    // A plain failure leaves the session alone
    assert!(ctx.credentials().has_access_token());
}

#[tokio::test]
async fn test_concurrent_expired_requests_share_one_refresh() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(-5), Some("refresh-1".into()))));
    let fresh = jwt_expiring_in(3600);

    transport.delay_refresh(Duration::from_millis(50));
    transport.push_refresh(refresh_ok(&fresh));
    for _ in 0..3 {
        transport.push(ok_json(r#"{"success":true,"data":null}"#));
    }

    let pipeline = ctx.pipeline();
    let (a, b, c) = tokio::join!(
        pipeline.send(ApiRequest::get("/orders")),
        pipeline.send(ApiRequest::get("/products")),
        pipeline.send(ApiRequest::get("/orders/issues")),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    assert_eq!(transport.refresh_calls(), 1);
    let calls = transport.api_calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|r| r.bearer.as_deref() == Some(fresh.as_str())));
}

#[tokio::test]
async fn test_refresh_endpoint_skips_outbound_phase() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(-5), Some("r".into()))));
    transport.push(respond(StatusCode::UNAUTHORIZED, "{}"));

    let request = ApiRequest::post("/vendors/auth/refresh")
        .json(&json!({"refresh_token": "r"}))
        .unwrap();
    let err = ctx.pipeline().send(request).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].bearer.is_none());
}

#[tokio::test]
async fn test_login_stores_credential() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, None);
    let token = jwt_expiring_in(3600);
    let body = json!({
        "success": true,
        "token": token,
        "refresh_token": "refresh-login",
        "vendor": {"id": 3, "vendor_name": "Lola's Kakanin", "vendor_email": "lola@example.com"}
    });
    transport.push(ok_json(&cipher().encrypt(&body).unwrap()));

    let vendor = ctx.api().login("lola@example.com", "hunter2").await.unwrap();
    assert_eq!(vendor.map(|v| v.id), Some("3".to_string()));

    let stored = ctx.credentials().get();
    assert_eq!(stored.access_token.as_deref(), Some(token.as_str()));
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-login"));
    assert!(ctx.is_authenticated());

    let requests = transport.requests();
    assert!(requests[0].bearer.is_none());
    assert_eq!(
        requests[0].body,
        RequestBody::Json(json!({"vendor_email": "lola@example.com", "password": "hunter2"}))
    );
}

#[tokio::test]
async fn test_api_wrappers_build_expected_requests() {
    let transport = ScriptedTransport::new();
    let ctx = context(&transport, Some(Credential::new(jwt_expiring_in(3600), Some("r".into()))));
    transport.push(ok_json(r#"{"success":true,"data":[]}"#));
    transport.push(ok_json(r#"{"success":true,"data":null,"message":"Deleted"}"#));

    let api = ctx.api();
    let page = api.completed_orders(2, 25).await.unwrap();
    assert!(page.success);
    let deleted = api.delete_products(&[4, 9]).await.unwrap();
    assert_eq!(deleted.message.as_deref(), Some("Deleted"));

    let calls = transport.api_calls();
    assert_eq!(calls[0].url, format!("{}/orders/completed", API_BASE));
    assert_eq!(
        calls[0].query,
        vec![("page".to_string(), "2".to_string()), ("per_page".to_string(), "25".to_string())]
    );
    assert_eq!(calls[1].method, Method::DELETE);
    assert_eq!(calls[1].query, vec![("product_ids".to_string(), "4,9".to_string())]);
}
