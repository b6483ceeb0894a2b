//! Wire-protocol and admin-surface tests over in-memory backends.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use common::{build_harness, sha256_hex};
use terracache::catalog::{ProviderIdentity, ProviderRecord};
use terracache::config::Config;
use terracache::storage::keys;

async fn get(app: &Router, uri: &str) -> (StatusCode, Bytes) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

fn json(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

/// Upload a blob and insert the matching catalog row, returning the record.
async fn seed_provider(
    harness: &common::Harness,
    namespace: &str,
    name: &str,
    version: &str,
    platform: &str,
) -> ProviderRecord {
    let filename = format!(
        "terraform-provider-{}_{}_{}.zip",
        name, version, platform
    );
    let content = format!("seeded archive {}/{}/{}/{}", namespace, name, version, platform);
    let shasum = sha256_hex(content.as_bytes());
    let key = keys::provider_archive(
        "registry.terraform.io",
        namespace,
        name,
        version,
        platform,
        &filename,
    )
    .unwrap();

    harness
        .storage
        .upload(&key, Bytes::from(content.clone()), "application/zip", &[])
        .await
        .unwrap();

    let now = Utc::now();
    let (record, created) = harness
        .catalog
        .create_provider(ProviderRecord {
            id: Uuid::now_v7().to_string(),
            identity: ProviderIdentity::new(namespace, name, version, platform),
            filename,
            shasum,
            storage_key: key,
            size_bytes: content.len() as u64,
            protocols: vec!["5.0".to_string()],
            created_at: now,
            updated_at: now,
            deprecated: false,
            blocked: false,
        })
        .await
        .unwrap();
    assert!(created);
    record
}

#[tokio::test]
async fn service_discovery_document() {
    let harness = build_harness(Config::default());
    let (status, body) = get(&harness.app, "/.well-known/terraform.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json(&body),
        serde_json::json!({"providers.v1": "/v1/providers/"})
    );
}

#[tokio::test]
async fn unknown_provider_is_a_json_404() {
    let harness = build_harness(Config::default());
    let (status, body) = get(&harness.app, "/v1/providers/hashicorp/unknown/versions").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json(&body)["errors"].is_array());
}

#[tokio::test]
async fn versions_aggregates_catalog_rows() {
    let harness = build_harness(Config::default());
    seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;
    seed_provider(&harness, "hashicorp", "random", "3.5.0", "darwin_arm64").await;
    seed_provider(&harness, "hashicorp", "random", "3.6.0", "linux_amd64").await;

    let (status, body) = get(&harness.app, "/v1/providers/hashicorp/random/versions").await;
    assert_eq!(status, StatusCode::OK);

    let body = json(&body);
    let versions = body["versions"].as_array().unwrap();
    assert_eq!(versions.len(), 2);
    // Newest first.
    assert_eq!(versions[0]["version"], "3.6.0");
    assert_eq!(versions[1]["version"], "3.5.0");
    let platforms = versions[1]["platforms"].as_array().unwrap();
    assert!(platforms.contains(&serde_json::json!({"os": "linux", "arch": "amd64"})));
    assert!(platforms.contains(&serde_json::json!({"os": "darwin", "arch": "arm64"})));
}

#[tokio::test]
async fn download_metadata_and_blob_round_trip() {
    let harness = build_harness(Config::default());
    let record = seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;

    let (status, body) = get(
        &harness.app,
        "/v1/providers/hashicorp/random/3.5.0/download/linux/amd64",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body = json(&body);
    assert_eq!(body["os"], "linux");
    assert_eq!(body["arch"], "amd64");
    assert_eq!(body["shasum"], serde_json::json!(record.shasum));
    assert_eq!(body["protocols"], serde_json::json!(["5.0"]));
    assert!(body["signing_keys"].is_object());

    // The in-memory backend presigns to the serving layer's blob route; the
    // bytes there must hash to the advertised shasum.
    let download_url = body["download_url"].as_str().unwrap();
    assert!(download_url.starts_with("/blobs/"));
    let (status, archive) = get(&harness.app, download_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sha256_hex(&archive), record.shasum);
}

#[tokio::test]
async fn download_metadata_miss_is_404_when_autoload_disabled() {
    let harness = build_harness(Config::default());
    let (status, _) = get(
        &harness.app,
        "/v1/providers/hashicorp/random/3.5.0/download/linux/amd64",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mirror_protocol_views() {
    let harness = build_harness(Config::default());
    let record = seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;

    let (status, body) = get(
        &harness.app,
        "/registry.terraform.io/hashicorp/random/index.json",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body), serde_json::json!({"versions": {"3.5.0": {}}}));

    let (status, body) = get(
        &harness.app,
        "/registry.terraform.io/hashicorp/random/3.5.0.json",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    let archive = &body["archives"]["linux_amd64"];
    assert_eq!(
        archive["hashes"],
        serde_json::json!([format!("zh:{}", record.shasum)])
    );
    let url = archive["url"].as_str().unwrap();
    let (status, bytes) = get(&harness.app, url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sha256_hex(&bytes), record.shasum);
}

#[tokio::test]
async fn mirror_rejects_unrecognized_trailing_component() {
    let harness = build_harness(Config::default());
    seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;

    let (status, _) = get(
        &harness.app,
        "/registry.terraform.io/hashicorp/random/archive.zip",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(
        &harness.app,
        "/registry.terraform.io/hashicorp/random/9.9.9.json",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn versions_response_is_cached_by_request_path() {
    let harness = build_harness(Config::default());
    seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;

    let (_, first) = get(&harness.app, "/v1/providers/hashicorp/random/versions").await;

    // New catalog rows do not appear until the cached document expires.
    seed_provider(&harness, "hashicorp", "random", "3.6.0", "linux_amd64").await;
    let (_, second) = get(&harness.app, "/v1/providers/hashicorp/random/versions").await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn load_definitions_creates_a_job() {
    let harness = build_harness(Config::default());
    let definitions = r#"
provider "hashicorp/random" {
  versions  = ["3.5.0", "3.6.0"]
  platforms = ["linux_amd64"]
}
"#;

    let (status, body) = send(
        &harness.app,
        Request::builder()
            .method("POST")
            .uri("/admin/definitions")
            .header("X-Terracache-Caller", "ops@example.com")
            .body(Body::from(definitions))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let body = json(&body);
    assert_eq!(body["providers"], 1);
    assert_eq!(body["total_items"], 2);
    let job_id = body["job_id"].as_u64().unwrap();

    let (status, body) = get(&harness.app, &format!("/admin/jobs/{}", job_id)).await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn invalid_definitions_are_rejected() {
    let harness = build_harness(Config::default());
    let (status, body) = send(
        &harness.app,
        Request::builder()
            .method("POST")
            .uri("/admin/definitions")
            .body(Body::from("provider \"oops\" {}"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["errors"][0].as_str().unwrap().contains("oops"));
}

#[tokio::test]
async fn job_cancel_and_retry_lifecycle() {
    let harness = build_harness(Config::default());
    let job = harness
        .catalog
        .create_job(
            "preload",
            &[ProviderIdentity::new(
                "hashicorp",
                "random",
                "3.5.0",
                "linux_amd64",
            )],
        )
        .await
        .unwrap();

    // Retrying a pending job conflicts.
    let (status, _) = send(
        &harness.app,
        Request::builder()
            .method("POST")
            .uri(format!("/admin/jobs/{}/retry", job.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &harness.app,
        Request::builder()
            .method("POST")
            .uri(format!("/admin/jobs/{}/cancel", job.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, body) = get(&harness.app, &format!("/admin/jobs/{}", job.id)).await;
    assert_eq!(json(&body)["status"], "cancelled");

    // A cancelled job is terminal, so retry is allowed; nothing had failed.
    let (status, body) = send(
        &harness.app,
        Request::builder()
            .method("POST")
            .uri(format!("/admin/jobs/{}/retry", job.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["reset_items"], 0);
}

#[tokio::test]
async fn provider_admin_flags_and_delete() {
    let harness = build_harness(Config::default());
    let record = seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;

    // Block it: hidden from the catalog views, download refused.
    let (status, body) = send(
        &harness.app,
        Request::builder()
            .method("PATCH")
            .uri(format!("/admin/providers/{}/flags", record.id))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"blocked": true}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["blocked"], true);

    let (status, _) = get(&harness.app, "/v1/providers/hashicorp/random/versions").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(
        &harness.app,
        "/v1/providers/hashicorp/random/3.5.0/download/linux/amd64",
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Delete removes the row and the blob.
    let (status, _) = send(
        &harness.app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/admin/providers/{}", record.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!harness.storage.exists(&record.storage_key).await.unwrap());

    let (status, _) = send(
        &harness.app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/admin/providers/{}", record.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blocked_catalog_entry_is_not_proxied_upstream() {
    // A blocked row must stay hidden even when auto-download could consult
    // the upstream list; the unreachable upstream URL makes any proxy
    // attempt fail loudly instead of 404ing.
    let mut config = Config::default();
    config.auto_download.enabled = true;
    config.upstream.url = "http://127.0.0.1:9".to_string();
    config.processor.retry_attempts = 1;
    let harness = build_harness(config);

    let record = seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;
    harness
        .catalog
        .set_provider_flags(&record.id, None, Some(true))
        .await
        .unwrap();

    let (status, _) = get(&harness.app, "/v1/providers/hashicorp/random/versions").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn provider_listing_filters_and_paginates() {
    let harness = build_harness(Config::default());
    seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;
    seed_provider(&harness, "hashicorp", "null", "3.2.0", "linux_amd64").await;
    seed_provider(&harness, "community", "thing", "1.0.0", "linux_amd64").await;

    let (status, body) = get(&harness.app, "/admin/providers?namespace=hashicorp").await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["total"], 2);

    let (_, body) = get(
        &harness.app,
        "/admin/providers?namespace=hashicorp&limit=1&offset=1",
    )
    .await;
    let body = json(&body);
    assert_eq!(body["providers"].as_array().unwrap().len(), 1);
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn stats_and_config_views() {
    let harness = build_harness(Config::default());
    seed_provider(&harness, "hashicorp", "random", "3.5.0", "linux_amd64").await;
    get(&harness.app, "/v1/providers/hashicorp/random/versions").await;

    let (status, body) = get(&harness.app, "/admin/stats").await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["catalog"]["providers"], 1);
    assert!(body["cache"].is_object());
    assert!(body["auto_download"].is_object());
    assert!(body["totals"]["cache_size"].is_string());

    let (status, body) = get(&harness.app, "/admin/config").await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["server"]["hostname"], "registry.terraform.io");
    // Secrets never serialize.
    assert!(body["storage"].get("access_key").is_none());
    assert!(body["storage"].get("secret_key").is_none());
}

#[tokio::test]
async fn healthz_reports_components() {
    let harness = build_harness(Config::default());
    let (status, body) = get(&harness.app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["catalog"], "healthy");
}
