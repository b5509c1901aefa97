//! Bulk entity resolution over the full stack with an on-disk database.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use esigate::cache::ResponseCache;
use esigate::config::Config;
use esigate::credentials::CredentialStore;
use esigate::entities::EntityResolver;
use esigate::gateway::EsiGateway;
use esigate::oauth::AuthManager;

fn build_resolver(server_url: &str, db_path: &str) -> EntityResolver {
    let key = BASE64.encode([3u8; 32]);
    let config: Config = serde_json::from_value(serde_json::json!({
        "client_id": "app-id",
        "client_secret": "app-secret",
        "redirect_uri": "http://localhost:8080/callback",
        "encryption_key": key,
        "token_url": format!("{server_url}/token"),
        "api_base_url": server_url,
        "database_path": db_path,
    }))
    .unwrap();

    let store = Arc::new(CredentialStore::new(db_path, &config.encryption_key).unwrap());
    let auth = Arc::new(AuthManager::new(&config, store));
    let cache = Arc::new(ResponseCache::new(db_path).unwrap());
    let gateway = Arc::new(EsiGateway::new(&config, cache, auth));

    EntityResolver::new(&config, gateway).unwrap()
}

#[tokio::test]
async fn empty_input_short_circuits() {
    // Unroutable base URL: any network call would fail the test
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("esigate.db");
    let resolver = build_resolver("http://127.0.0.1:1", db.to_str().unwrap());

    assert!(resolver.resolve_ids(&[]).await.unwrap().is_empty());
    assert!(resolver.resolve_names(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn partial_hit_batches_only_the_misses() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("esigate.db");

    // First round resolves both ids upstream
    let first = server
        .mock("POST", "/universe/names/")
        .match_body(mockito::Matcher::Json(serde_json::json!([1_000_001, 1_000_002])))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[
                {"id":1000001,"name":"State Protectorate","category":"corporation"},
                {"id":1000002,"name":"Federal Defense Union","category":"corporation"}
            ]"#,
        )
        .expect(1)
        .create_async()
        .await;

    let resolver = build_resolver(&server.url(), db.to_str().unwrap());

    let names = resolver
        .resolve_ids(&[1_000_001, 1_000_002])
        .await
        .unwrap();
    assert_eq!(names.len(), 2);
    assert_eq!(names[&1_000_001], "State Protectorate");
    first.assert_async().await;

    // Second round: 1000001/1000002 are cached, only 1000003 goes upstream
    let second = server
        .mock("POST", "/universe/names/")
        .match_body(mockito::Matcher::Json(serde_json::json!([1_000_003])))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":1000003,"name":"Tribal Liberation Force","category":"corporation"}]"#)
        .expect(1)
        .create_async()
        .await;

    let names = resolver
        .resolve_ids(&[1_000_001, 1_000_002, 1_000_003])
        .await
        .unwrap();
    assert_eq!(names.len(), 3);
    assert_eq!(names[&1_000_003], "Tribal Liberation Force");
    second.assert_async().await;
}

#[tokio::test]
async fn unresolvable_ids_are_absent_not_errors() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("esigate.db");

    let _mock = server
        .mock("POST", "/universe/names/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":42,"name":"Known","category":"character"}]"#)
        .create_async()
        .await;

    let resolver = build_resolver(&server.url(), db.to_str().unwrap());
    let names = resolver.resolve_ids(&[42, 99]).await.unwrap();

    assert_eq!(names.len(), 1);
    assert!(names.contains_key(&42));
    assert!(!names.contains_key(&99));
}

#[tokio::test]
async fn upstream_failure_degrades_to_cached_entries() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("esigate.db");

    let seed = server
        .mock("POST", "/universe/names/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":7,"name":"Cached Entity","category":"alliance"}]"#)
        .expect(1)
        .create_async()
        .await;

    let resolver = build_resolver(&server.url(), db.to_str().unwrap());
    resolver.resolve_ids(&[7]).await.unwrap();
    seed.assert_async().await;

    // Upstream now fails; the cached id still resolves, the new one is lost
    let _broken = server
        .mock("POST", "/universe/names/")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let names = resolver.resolve_ids(&[7, 8]).await.unwrap();
    assert_eq!(names.len(), 1);
    assert_eq!(names[&7], "Cached Entity");
}

#[tokio::test]
async fn resolve_names_merges_typed_arrays() {
    let mut server = mockito::Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("esigate.db");

    let mock = server
        .mock("POST", "/universe/ids/")
        .match_body(mockito::Matcher::Json(serde_json::json!([
            "Cass Vector",
            "State Protectorate"
        ])))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "characters": [{"id":91000001,"name":"Cass Vector"}],
                "corporations": [{"id":1000001,"name":"State Protectorate"}]
            }"#,
        )
        .expect(1)
        .create_async()
        .await;

    let resolver = build_resolver(&server.url(), db.to_str().unwrap());

    let ids = resolver
        .resolve_names(&["Cass Vector".to_string(), "State Protectorate".to_string()])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids["Cass Vector"], 91_000_001);
    assert_eq!(ids["State Protectorate"], 1_000_001);
    mock.assert_async().await;

    // Both directions are now cached: ids resolve without another call
    let names = resolver.resolve_ids(&[91_000_001]).await.unwrap();
    assert_eq!(names[&91_000_001], "Cass Vector");
}
