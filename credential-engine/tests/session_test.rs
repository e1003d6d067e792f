//! Integration tests for token issuance, refresh and logout.

mod common;

use chrono::{Duration, Utc};
use common::{TestApp, PASSWORD};
use credential_engine::{
    dtos::{LogoutRequest, RefreshRequest, TokenRequest},
    models::Role,
    services::RefreshStore,
    EngineError,
};
use std::sync::Arc;

#[tokio::test]
async fn get_token_embeds_roles_and_service_scope() {
    let app = TestApp::spawn().await;
    app.register("jane_doe", Role::Client).await;

    let pair = app
        .login("jane_doe", Some("invoice-generator::read"))
        .await
        .unwrap();
    assert_eq!(pair.token_type, "Bearer");
    assert!(!pair.refresh_token.is_empty());

    let claims = app.engine.issuer.validate(&pair.access_token).unwrap();
    assert_eq!(claims.sub, "jane_doe");
    assert_eq!(claims.authorities, vec!["ROLE_CLIENT"]);
    assert_eq!(claims.scope.as_deref(), Some("read"));
    assert_eq!(claims.service_name.as_deref(), Some("invoice-generator"));
    assert_eq!(claims.exp - claims.iat, 3600);
    assert_eq!(claims.expires_at(), pair.access_expires_at);

    let record = app
        .engine
        .refresh_store
        .find_by_principal("jane_doe")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.token_id, pair.refresh_token);
    assert_eq!(record.expires_at, pair.refresh_expires_at);
}

#[tokio::test]
async fn repeated_get_token_reuses_cached_access_token() {
    let app = TestApp::spawn().await;
    app.register("jane_doe", Role::Client).await;

    let first = app.login("jane_doe", None).await.unwrap();
    let second = app.login("jane_doe", None).await.unwrap();

    assert_eq!(first.access_token, second.access_token);
    assert_eq!(first.refresh_token, second.refresh_token);
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let app = TestApp::spawn().await;
    app.register("jane_doe", Role::Client).await;

    let wrong_password = app
        .engine
        .sessions
        .get_token(&TokenRequest::new("jane_doe", "not-the-password", None))
        .await
        .unwrap_err();
    let unknown_user = app
        .engine
        .sessions
        .get_token(&TokenRequest::new("john_doe", PASSWORD, None))
        .await
        .unwrap_err();

    assert!(matches!(wrong_password, EngineError::InvalidCredentials));
    assert!(matches!(unknown_user, EngineError::InvalidCredentials));
    assert_eq!(wrong_password.to_string(), unknown_user.to_string());
}

#[tokio::test]
async fn malformed_service_scope_is_rejected() {
    let app = TestApp::spawn().await;
    app.register("jane_doe", Role::Client).await;

    let err = app.login("jane_doe", Some("invoice-generator::delete")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}

#[tokio::test]
async fn refresh_keeps_identifier_and_extends_access_expiry() {
    let app = TestApp::spawn().await;
    app.register("jane_doe", Role::Client).await;
    let pair = app.login("jane_doe", None).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let refreshed = app
        .engine
        .sessions
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap();

    assert_eq!(refreshed.refresh_token, pair.refresh_token);
    assert_eq!(refreshed.refresh_expires_at, pair.refresh_expires_at);
    assert!(refreshed.access_expires_at > pair.access_expires_at);
    assert_ne!(refreshed.access_token, pair.access_token);
}

#[tokio::test]
async fn refresh_request_ignores_partial_scope() {
    let app = TestApp::spawn().await;
    app.register("jane_doe", Role::Client).await;
    let pair = app.login("jane_doe", None).await.unwrap();

    let refreshed = app
        .engine
        .sessions
        .refresh_request(&RefreshRequest {
            refresh_token: pair.refresh_token.clone(),
            service: Some("invoice-generator".to_string()),
            scope: None,
        })
        .await
        .unwrap();

    let claims = app.engine.issuer.validate(&refreshed.access_token).unwrap();
    assert!(claims.scope.is_none());
    assert!(claims.service_name.is_none());
}

#[tokio::test]
async fn refresh_with_unknown_identifier_is_not_found() {
    let app = TestApp::spawn().await;
    let err = app.engine.sessions.refresh("unknown", None).await.unwrap_err();
    assert!(matches!(err, EngineError::RefreshTokenNotFound));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn expired_refresh_record_is_rotated_on_next_get_token() {
    let app = TestApp::spawn().await;
    app.register("jane_doe", Role::Client).await;
    let pair = app.login("jane_doe", None).await.unwrap();

    let store = &app.engine.refresh_store;
    let current = store.find_by_token(&pair.refresh_token).await.unwrap().unwrap();
    store
        .replace(&current.token_id, &current.renewed(Utc::now() - Duration::seconds(5)))
        .await
        .unwrap();

    let err = app
        .engine
        .sessions
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap_err();
    assert!(err.is_expired());

    let renewed = app.login("jane_doe", None).await.unwrap();
    assert_ne!(renewed.refresh_token, pair.refresh_token);
    assert!(renewed.refresh_expires_at > Utc::now());
    assert!(store.find_by_token(&pair.refresh_token).await.unwrap().is_none());
}

#[tokio::test]
async fn expired_refresh_record_keeps_identifier_without_rotation() {
    let app = TestApp::spawn_with(|config| config.session.rotate_refresh_on_renewal = false).await;
    app.register("jane_doe", Role::Client).await;
    let pair = app.login("jane_doe", None).await.unwrap();

    let store = &app.engine.refresh_store;
    let current = store.find_by_token(&pair.refresh_token).await.unwrap().unwrap();
    store
        .replace(&current.token_id, &current.renewed(Utc::now() - Duration::seconds(5)))
        .await
        .unwrap();

    let renewed = app.login("jane_doe", None).await.unwrap();
    assert_eq!(renewed.refresh_token, pair.refresh_token);
    assert!(renewed.refresh_expires_at > Utc::now());
}

#[tokio::test]
async fn concurrent_first_issuance_yields_single_refresh_record() {
    let app = Arc::new(TestApp::spawn().await);
    app.register("jane_doe", Role::Client).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.login("jane_doe", None).await })
        })
        .collect();

    let mut refresh_ids = Vec::new();
    for handle in handles {
        refresh_ids.push(handle.await.unwrap().unwrap().refresh_token);
    }
    refresh_ids.dedup();
    assert_eq!(refresh_ids.len(), 1);

    let record = app
        .engine
        .refresh_store
        .find_by_principal("jane_doe")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.token_id, refresh_ids[0]);
}

#[tokio::test]
async fn logout_twice_reports_not_found() {
    let app = TestApp::spawn().await;
    app.register("jane_doe", Role::Client).await;
    let pair = app.login("jane_doe", None).await.unwrap();

    let logout = LogoutRequest {
        refresh_token: pair.refresh_token.clone(),
    };
    app.engine.sessions.logout_request(&logout).await.unwrap();

    let err = app.engine.sessions.logout_request(&logout).await.unwrap_err();
    assert!(matches!(err, EngineError::RefreshTokenNotFound));

    let err = app
        .engine
        .sessions
        .refresh(&pair.refresh_token, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RefreshTokenNotFound));
}

#[tokio::test]
async fn role_change_is_reflected_in_next_token() {
    let app = TestApp::spawn().await;
    let jane = app.register("jane_doe", Role::Client).await;
    let before = app.login("jane_doe", None).await.unwrap();

    app.engine
        .authz
        .assign_role(jane.principal_id, Role::Manager)
        .await
        .unwrap();

    let after = app.login("jane_doe", None).await.unwrap();
    assert_ne!(before.access_token, after.access_token);
    assert_eq!(before.refresh_token, after.refresh_token);

    let claims = app.engine.issuer.validate(&after.access_token).unwrap();
    assert!(claims.authorities.contains(&"ROLE_MANAGER".to_string()));
    assert!(claims.authorities.contains(&"ROLE_CLIENT".to_string()));
}

#[tokio::test]
async fn token_signed_before_role_grant_is_not_served_after_it() {
    let app = TestApp::spawn().await;
    let jane = app.register("jane_doe", Role::Client).await;
    let stale = app
        .engine
        .authz
        .find_principal_by_name("jane_doe")
        .await
        .unwrap()
        .unwrap();

    app.engine
        .authz
        .assign_role(jane.principal_id, Role::Manager)
        .await
        .unwrap();
    // a request that loaded the principal before the grant finishes afterwards
    app.engine.sessions.get_or_create(&stale, None).await.unwrap();

    let after = app.login("jane_doe", None).await.unwrap();
    let claims = app.engine.issuer.validate(&after.access_token).unwrap();
    assert_eq!(claims.authorities, vec!["ROLE_MANAGER", "ROLE_CLIENT"]);
}
