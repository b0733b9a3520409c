mod common;

use std::collections::HashMap;
use std::sync::Arc;

use epicfhir_auth::codec;
use epicfhir_auth::{
    AuthError, CredentialStorage, MemoryCredentialStorage, NewCredential, PkceChallenge,
    PkceVerifier, SESSION_HASH_COOKIE, SessionBinding,
};
use time::{Duration, OffsetDateTime};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{context, token_service};

async fn register(storage: &MemoryCredentialStorage, user_id: &str, client_id: &str) -> i64 {
    storage
        .register(&NewCredential {
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            ..NewCredential::default()
        })
        .await
        .unwrap()
}

fn form_fields(body: &[u8]) -> HashMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

async fn mount_token(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": token})),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn client_credentials_grant_end_to_end() {
    let server = MockServer::start().await;
    mount_token(&server, "tok123").await;

    let storage = Arc::new(MemoryCredentialStorage::new());
    let id = register(&storage, "u1", "c1").await;
    let service = token_service(&server.uri(), storage.clone());
    let mut ctx = context("telemedicall.com");

    let before = OffsetDateTime::now_utc();
    let token = service.ensure_valid_token(&mut ctx, "u1", "c1").await.unwrap();
    assert_eq!(token, "tok123");

    // exactly one form POST carrying a three-segment RS256 assertion
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let form = form_fields(&requests[0].body);
    assert_eq!(form["grant_type"], "client_credentials");
    assert_eq!(
        form["client_assertion_type"],
        "urn:ietf:params:oauth:client-assertion-type:jwt-bearer"
    );
    assert_eq!(form["scope"], service.config().oauth_scope);

    let segments: Vec<&str> = form["client_assertion"].split('.').collect();
    assert_eq!(segments.len(), 3);
    let header: serde_json::Value =
        serde_json::from_slice(&codec::decode(segments[0]).unwrap()).unwrap();
    assert_eq!(
        header,
        serde_json::json!({"alg": "RS256", "typ": "JWT", "kid": "Epic-key"})
    );
    let claims: serde_json::Value =
        serde_json::from_slice(&codec::decode(segments[1]).unwrap()).unwrap();
    assert_eq!(claims["iss"], "c1");
    assert_eq!(claims["sub"], "c1");
    assert_eq!(claims["aud"], service.config().token_url);
    assert_eq!(
        claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
        300
    );

    // SessionHash cookie issued and bound to the stored record
    let cookie = ctx.jar.get(SESSION_HASH_COOKIE).expect("SessionHash cookie");
    assert_eq!(cookie.value().len(), 64);
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.secure(), Some(true));

    let record = storage.get(id).unwrap();
    assert_eq!(record.token.as_deref(), Some("tok123"));
    assert_eq!(record.session_hash.as_deref(), Some(cookie.value()));
    let expiry = record.session_expiry.unwrap();
    let after = OffsetDateTime::now_utc();
    assert!(expiry >= before + Duration::hours(1));
    assert!(expiry <= after + Duration::hours(1));

    assert_eq!(ctx.session.access_token.as_deref(), Some("tok123"));
}

#[tokio::test]
async fn session_token_skips_network() {
    let server = MockServer::start().await;
    mount_token(&server, "unused").await;

    let storage = Arc::new(MemoryCredentialStorage::new());
    register(&storage, "u1", "c1").await;
    let service = token_service(&server.uri(), storage);

    let mut ctx = context("telemedicall.com");
    ctx.session.access_token = Some("from-session".to_string());
    let token = service.ensure_valid_token(&mut ctx, "u1", "c1").await.unwrap();

    assert_eq!(token, "from-session");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn valid_session_hash_skips_grant() {
    let server = MockServer::start().await;
    mount_token(&server, "unused").await;

    let storage = Arc::new(MemoryCredentialStorage::new());
    let id = register(&storage, "u1", "c1").await;
    storage
        .update_session(
            id,
            &SessionBinding {
                token: "bound-token".to_string(),
                session_hash: "ab".repeat(32),
                session_expiry: OffsetDateTime::now_utc() + Duration::minutes(30),
            },
        )
        .await
        .unwrap();
    let service = token_service(&server.uri(), storage);

    let mut ctx = context("telemedicall.com").with_session_hash("ab".repeat(32));
    let token = service.ensure_valid_token(&mut ctx, "u1", "c1").await.unwrap();

    assert_eq!(token, "bound-token");
    assert_eq!(ctx.session.access_token.as_deref(), Some("bound-token"));
    assert!(ctx.jar.get(SESSION_HASH_COOKIE).is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_session_hash_triggers_one_grant() {
    let server = MockServer::start().await;
    mount_token(&server, "fresh").await;

    let storage = Arc::new(MemoryCredentialStorage::new());
    let id = register(&storage, "u1", "c1").await;
    let stale_hash = "cd".repeat(32);
    storage
        .update_session(
            id,
            &SessionBinding {
                token: "stale".to_string(),
                session_hash: stale_hash.clone(),
                session_expiry: OffsetDateTime::now_utc() - Duration::seconds(1),
            },
        )
        .await
        .unwrap();
    let service = token_service(&server.uri(), storage.clone());

    let mut ctx = context("telemedicall.com").with_session_hash(stale_hash.clone());
    let token = service.ensure_valid_token(&mut ctx, "u1", "c1").await.unwrap();

    assert_eq!(token, "fresh");
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    let record = storage.get(id).unwrap();
    assert_ne!(record.session_hash.as_deref(), Some(stale_hash.as_str()));
    let remaining = record.session_expiry.unwrap() - OffsetDateTime::now_utc();
    assert!(remaining > Duration::minutes(59));
    assert!(remaining <= Duration::hours(1));
}

#[tokio::test]
async fn np_client_id_alias_is_accepted() {
    let server = MockServer::start().await;
    mount_token(&server, "np-token").await;

    let storage = Arc::new(MemoryCredentialStorage::new());
    storage
        .register(&NewCredential {
            user_id: "u1".to_string(),
            client_id: "prod-client".to_string(),
            np_client_id: Some("np-client".to_string()),
            ..NewCredential::default()
        })
        .await
        .unwrap();
    let service = token_service(&server.uri(), storage);

    let token = service
        .ensure_valid_token(&mut context("telemedicall.com"), "u1", "np-client")
        .await
        .unwrap();
    assert_eq!(token, "np-token");

    // the assertion is issued for the client id the caller asked for
    let requests = server.received_requests().await.unwrap();
    let form = form_fields(&requests[0].body);
    let claims: serde_json::Value = serde_json::from_slice(
        &codec::decode(form["client_assertion"].split('.').nth(1).unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(claims["iss"], "np-client");
}

#[tokio::test]
async fn upstream_rejection_leaves_record_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"error\":\"invalid_client\"}"))
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryCredentialStorage::new());
    let id = register(&storage, "u1", "c1").await;
    let service = token_service(&server.uri(), storage.clone());

    let mut ctx = context("telemedicall.com");
    let err = service.ensure_valid_token(&mut ctx, "u1", "c1").await.unwrap_err();
    assert!(matches!(err, AuthError::TokenRequestFailed { status: 400, .. }));

    let record = storage.get(id).unwrap();
    assert!(record.token.is_none());
    assert!(record.session_hash.is_none());
    assert!(record.session_expiry.is_none());
    assert!(ctx.jar.get(SESSION_HASH_COOKIE).is_none());
    assert!(ctx.session.access_token.is_none());
}

#[tokio::test]
async fn concurrent_callers_share_one_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_millis(200))
                .set_body_json(serde_json::json!({"access_token": "shared"})),
        )
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryCredentialStorage::new());
    register(&storage, "u1", "c1").await;
    let service = Arc::new(token_service(&server.uri(), storage));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let mut ctx = context("telemedicall.com");
            let token = service.ensure_valid_token(&mut ctx, "u1", "c1").await.unwrap();
            let hash = ctx.jar.get(SESSION_HASH_COOKIE).unwrap().value().to_string();
            (token, hash)
        }));
    }

    let mut hashes = Vec::new();
    for handle in handles {
        let (token, hash) = handle.await.unwrap();
        assert_eq!(token, "shared");
        hashes.push(hash);
    }

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    hashes.dedup();
    assert_eq!(hashes.len(), 1, "every caller receives the same session hash");
}

#[tokio::test]
async fn concurrent_callers_share_one_failed_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_delay(std::time::Duration::from_millis(200))
                .set_body_string("upstream down"),
        )
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryCredentialStorage::new());
    register(&storage, "u1", "c1").await;
    let service = Arc::new(token_service(&server.uri(), storage));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let mut ctx = context("telemedicall.com");
            let err = service
                .ensure_valid_token(&mut ctx, "u1", "c1")
                .await
                .unwrap_err();
            assert!(ctx.jar.get(SESSION_HASH_COOKIE).is_none());
            err
        }));
    }

    for handle in handles {
        let err = handle.await.unwrap();
        assert!(
            matches!(err, AuthError::TokenRequestFailed { status: 500, ref body } if body == "upstream down"),
            "{err:?}"
        );
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    // a later caller starts a fresh grant
    let mut ctx = context("telemedicall.com");
    let err = service.ensure_valid_token(&mut ctx, "u1", "c1").await.unwrap_err();
    assert!(matches!(err, AuthError::TokenRequestFailed { status: 500, .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn launch_builds_pkce_redirect() {
    let server = MockServer::start().await;
    let service = token_service(&server.uri(), Arc::new(MemoryCredentialStorage::new()));

    let mut ctx = context("telemedicall.com");
    let url = service.launch(&mut ctx, "clientA").unwrap();
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

    assert!(url.as_str().starts_with(&service.config().auth_url));
    assert_eq!(query["client_id"], "clientA");
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["code_challenge_method"], "S256");
    assert_eq!(query["redirect_uri"], "https://telemedicall.com/Epic/Callback");
    assert_eq!(query["aud"], service.config().fhir_base);
    assert_eq!(query["scope"], service.config().smart_scope);

    let stored_state = ctx.session.oauth2_state.clone().unwrap();
    assert_eq!(query["state"], stored_state);
    assert_eq!(stored_state.len(), 32);

    let verifier = PkceVerifier::new(ctx.session.code_verifier.clone().unwrap()).unwrap();
    assert_eq!(verifier.as_str().len(), 86);
    assert_eq!(
        query["code_challenge"],
        PkceChallenge::from_verifier(&verifier).as_str()
    );
    assert_eq!(ctx.session.client_id.as_deref(), Some("clientA"));
}

#[tokio::test]
async fn launch_host_validation() {
    let server = MockServer::start().await;
    let service = token_service(&server.uri(), Arc::new(MemoryCredentialStorage::new()));

    for host in ["telemedicall.com", "sub.telemedicall.com"] {
        let url = service.launch(&mut context(host), "clientA").unwrap();
        assert!(url.as_str().contains(&format!("{host}%2FEpic%2FCallback")));
    }
    for host in [
        "eviltelemedicall.com",
        "telemedicall.com.evil.com",
        "evil.com/.telemedicall.com",
        "evil.com?.telemedicall.com",
        "evil.com#.telemedicall.com",
        "user@evil.com/x.telemedicall.com",
    ] {
        let mut ctx = context(host);
        let err = service.launch(&mut ctx, "clientA").unwrap_err();
        assert!(matches!(err, AuthError::InvalidHost { .. }), "{host}");
        assert!(ctx.session.oauth2_state.is_none(), "{host}");
    }
}

#[tokio::test]
async fn callback_state_mismatch_makes_no_call() {
    let server = MockServer::start().await;
    mount_token(&server, "never").await;
    let service = token_service(&server.uri(), Arc::new(MemoryCredentialStorage::new()));

    let mut ctx = context("telemedicall.com");
    service.launch(&mut ctx, "clientA").unwrap();

    let err = service
        .handle_callback(&mut ctx, Some("auth-code"), Some("forged-state"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::StateMismatch));
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(ctx.session.access_token.is_none());
}

#[tokio::test]
async fn callback_exchanges_code_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "user-token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "patient": "eq081-VQEgP8drUUqCWzHfw3"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let service = token_service(&server.uri(), Arc::new(MemoryCredentialStorage::new()));

    let mut ctx = context("sub.telemedicall.com");
    service.launch(&mut ctx, "clientA").unwrap();
    let state = ctx.session.oauth2_state.clone().unwrap();
    let verifier = ctx.session.code_verifier.clone().unwrap();

    let outcome = service
        .handle_callback(&mut ctx, Some("auth-code"), Some(&state))
        .await
        .unwrap();
    assert_eq!(outcome.access_token, "user-token");
    assert_eq!(outcome.patient.as_deref(), Some("eq081-VQEgP8drUUqCWzHfw3"));
    assert_eq!(ctx.session.access_token.as_deref(), Some("user-token"));
    assert_eq!(ctx.session.patient_id.as_deref(), Some("eq081-VQEgP8drUUqCWzHfw3"));

    let requests = server.received_requests().await.unwrap();
    let form = form_fields(&requests[0].body);
    assert_eq!(form["code"], "auth-code");
    assert_eq!(form["client_id"], "clientA");
    assert_eq!(form["code_verifier"], verifier);
    assert_eq!(form["redirect_uri"], "https://sub.telemedicall.com/Epic/Callback");
    assert_eq!(form["aud"], service.config().fhir_base);

    // state is single use
    let err = service
        .handle_callback(&mut ctx, Some("auth-code"), Some(&state))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::StateMismatch));
}
