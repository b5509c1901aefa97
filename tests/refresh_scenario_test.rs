//! Scheduler and gateway working together: a token expiring inside the
//! lookahead window is renewed by one scheduler cycle, and the following
//! authenticated fetch rides the new token without a second refresh.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use esigate::cache::ResponseCache;
use esigate::config::Config;
use esigate::credentials::CredentialStore;
use esigate::gateway::EsiGateway;
use esigate::oauth::AuthManager;
use esigate::scheduler::RefreshScheduler;

struct Stack {
    store: Arc<CredentialStore>,
    auth: Arc<AuthManager>,
    gateway: EsiGateway,
    scheduler: RefreshScheduler,
}

fn build_stack(server_url: &str) -> Stack {
    let key = BASE64.encode([9u8; 32]);
    let config: Config = serde_json::from_value(serde_json::json!({
        "client_id": "app-id",
        "client_secret": "app-secret",
        "redirect_uri": "http://localhost:8080/callback",
        "encryption_key": key,
        "token_url": format!("{server_url}/token"),
        "api_base_url": server_url,
        "refresh_period_secs": 300,
    }))
    .unwrap();

    let store = Arc::new(CredentialStore::new(":memory:", &config.encryption_key).unwrap());
    let auth = Arc::new(AuthManager::new(&config, Arc::clone(&store)));
    let cache = Arc::new(ResponseCache::new(":memory:").unwrap());
    let gateway = EsiGateway::new(&config, cache, Arc::clone(&auth));
    let scheduler = RefreshScheduler::new(&config, Arc::clone(&store), Arc::clone(&auth));

    Stack {
        store,
        auth,
        gateway,
        scheduler,
    }
}

#[tokio::test]
async fn scheduler_refresh_feeds_the_gateway() {
    let mut server = mockito::Server::new_async().await;

    // Exactly one refresh for the whole scenario
    let token_mock = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".to_string(),
            "refresh_token".to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at-renewed","expires_in":1200}"#)
        .expect(1)
        .create_async()
        .await;

    let whoami_mock = server
        .mock("GET", "/whoami")
        .match_header("authorization", "Bearer at-renewed")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("cache-control", "max-age=60")
        .with_body(r#"{"character_id":91000001}"#)
        .create_async()
        .await;

    let stack = build_stack(&server.url());

    // Token expires in 2 minutes; the 5-minute lookahead catches it
    stack
        .store
        .upsert(
            91_000_001,
            "Cass Vector",
            "owner-a",
            &["esi-wallet.read".to_string()],
            "at-stale",
            Some("rt-1"),
            Utc::now() + Duration::minutes(2),
        )
        .unwrap();

    let refreshed = stack.scheduler.run_once().await;
    assert_eq!(refreshed, 1);

    // expires_at moved forward, scopes and owner hash untouched
    let info = stack.store.token_info(91_000_001).unwrap().unwrap();
    assert!(info.expires_at > Utc::now() + Duration::minutes(15));
    assert_eq!(info.owner_hash, "owner-a");
    assert_eq!(info.scopes, vec!["esi-wallet.read"]);

    // The gateway now uses the renewed token; the expect(1) on the token
    // endpoint proves the fetch did not trigger a second refresh
    let result = stack
        .gateway
        .fetch_authenticated("/whoami", 91_000_001)
        .await
        .unwrap();
    assert!(!result.cached);
    assert_eq!(result.data["character_id"], 91_000_001);

    token_mock.assert_async().await;
    whoami_mock.assert_async().await;

    // And a repeat within the cache TTL is served locally
    let again = stack
        .gateway
        .fetch_authenticated("/whoami", 91_000_001)
        .await
        .unwrap();
    assert!(again.cached);
}

#[tokio::test]
async fn expired_token_refreshes_on_the_fetch_path() {
    let mut server = mockito::Server::new_async().await;

    let _token_mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"at-lazy","expires_in":1200}"#)
        .expect(1)
        .create_async()
        .await;

    let _api_mock = server
        .mock("GET", "/v1/assets")
        .match_header("authorization", "Bearer at-lazy")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;

    let stack = build_stack(&server.url());

    // Already expired: the fetch path itself must refresh synchronously
    stack
        .store
        .upsert(
            7,
            "Late Char",
            "oh",
            &[],
            "at-dead",
            Some("rt"),
            Utc::now() - Duration::minutes(5),
        )
        .unwrap();

    let result = stack.gateway.fetch_authenticated("/v1/assets", 7).await.unwrap();
    assert_eq!(result.data, serde_json::json!([]));

    let creds_token = stack.auth.access_token(7).await.unwrap();
    assert_eq!(creds_token.as_deref(), Some("at-lazy"));
}
