//! Token endpoint and interactive flow against local servers

mod common;

use common::*;
use gctl::authorizer::{InstalledFlowAuthorizer, InteractiveAuthorizer, ReturnMethod};
use gctl::error::{AuthError, GctlError};
use gctl::http::HttpClient;
use gctl::oauth::{OAuthClient, TokenRefresher};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use yup_oauth2::ApplicationSecret;

fn oauth_client(server: &MockServer) -> OAuthClient {
    let secret = ApplicationSecret {
        client_id: "client-123".to_string(),
        client_secret: "shh".to_string(),
        auth_uri: format!("{}/auth", server.uri()),
        token_uri: format!("{}/token", server.uri()),
        redirect_uris: vec!["http://localhost".to_string()],
        ..Default::default()
    };
    OAuthClient::new(secret, HttpClient::new(Duration::from_secs(5)).unwrap())
}

#[tokio::test]
async fn test_refresh_success_keeps_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let old = credential("a0", Some("r0"), -60);
    let refreshed = oauth_client(&server)
        .refresh(&old, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(refreshed.access_token, "a1");
    assert_eq!(refreshed.refresh_token.as_deref(), Some("r0"));
    assert_eq!(refreshed.scopes, old.scopes);
    assert!(!refreshed.is_expired());
}

#[tokio::test]
async fn test_refresh_invalid_grant_is_refresh_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&server)
        .await;

    let err = oauth_client(&server)
        .refresh(&credential("a0", Some("r0"), -60), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        GctlError::AuthError(AuthError::RefreshFailed(reason)) => {
            assert!(reason.contains("invalid_grant"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_refresh_gateway_error_is_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let err = oauth_client(&server)
        .refresh(&credential("a0", Some("r0"), -60), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, GctlError::AuthError(AuthError::Network(_))));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_refresh_without_refresh_token_fails_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = oauth_client(&server)
        .refresh(&credential("a0", None, -60), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GctlError::AuthError(AuthError::RefreshFailed(_))));
}

/// Play the browser: follow the consent URL's redirect_uri back to the listener
fn browser_redirect(consent_url: &str, query_override: Option<&str>) {
    let url = url::Url::parse(consent_url).unwrap();
    let params: std::collections::HashMap<String, String> =
        url.query_pairs().into_owned().collect();
    let redirect = url::Url::parse(&params["redirect_uri"]).unwrap();
    let state = params["state"].clone();
    let port = redirect.port().unwrap();
    let query = query_override
        .map(str::to_string)
        .unwrap_or_else(|| format!("code=auth-code-1&state={}", state));

    tokio::spawn(async move {
        // browsers often ask for a favicon first
        for target in ["/favicon.ico".to_string(), format!("/?{}", query)] {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            let request = format!("GET {} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", target);
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut response = Vec::new();
            let _ = stream.read_to_end(&mut response).await;
        }
    });
}

#[tokio::test]
async fn test_loopback_flow_exchanges_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_in": 3600,
            "scope": DRIVE_SCOPE
        })))
        .expect(1)
        .mount(&server)
        .await;

    let authorizer = InstalledFlowAuthorizer::new(oauth_client(&server), ReturnMethod::Loopback)
        .with_timeout(Duration::from_secs(10))
        .with_presenter(Arc::new(|url: &str| browser_redirect(url, None)));

    let credential = authorizer
        .authorize(&scopes(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(credential.access_token, "a1");
    assert_eq!(credential.refresh_token.as_deref(), Some("r1"));
    assert!(credential.covers(&scopes()));
}

#[tokio::test]
async fn test_loopback_flow_denied_consent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let authorizer = InstalledFlowAuthorizer::new(oauth_client(&server), ReturnMethod::Loopback)
        .with_timeout(Duration::from_secs(10))
        .with_presenter(Arc::new(|url: &str| {
            browser_redirect(url, Some("error=access_denied"))
        }));

    let err = authorizer
        .authorize(&scopes(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GctlError::AuthError(AuthError::UserCancelled(_))));
}

#[tokio::test]
async fn test_loopback_flow_cancelled_while_waiting() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let authorizer = InstalledFlowAuthorizer::new(oauth_client(&server), ReturnMethod::Loopback)
        .with_timeout(Duration::from_secs(10))
        .with_presenter(Arc::new(move |_url: &str| trigger.cancel()));

    let err = authorizer.authorize(&scopes(), &cancel).await.unwrap_err();
    assert!(matches!(err, GctlError::Cancelled(_)));
}

#[tokio::test]
async fn test_loopback_flow_times_out_as_user_cancelled() {
    let server = MockServer::start().await;
    let authorizer = InstalledFlowAuthorizer::new(oauth_client(&server), ReturnMethod::Loopback)
        .with_timeout(Duration::from_millis(50))
        .with_presenter(Arc::new(|_url: &str| {}));

    let err = authorizer
        .authorize(&scopes(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GctlError::AuthError(AuthError::UserCancelled(_))));
}
