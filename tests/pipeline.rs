use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Path as UrlPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{TimeZone, Utc};
use serde_json::json;

use vocabsync::collection::Collection;
use vocabsync::config::Config;
use vocabsync::http::{Fetcher, ReqwestClient, SystemClock};
use vocabsync::{SyncEngine, SyncSettings, SyncStats};

const API_KEY: &str = "test-key";

#[derive(Default)]
struct MockApi {
    base: String,
    subject_hits: Mutex<HashMap<u64, usize>>,
    audio_auth: Mutex<Vec<Option<String>>>,
}

impl MockApi {
    fn hits(&self, id: u64) -> usize {
        self.subject_hits.lock().unwrap().get(&id).copied().unwrap_or(0)
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    bearer == Some(format!("Bearer {}", API_KEY).as_str()) && headers.contains_key("wanikani-revision")
}

fn characters(id: u64) -> &'static str {
    match id {
        1 => "一",
        2 => "二",
        _ => "三",
    }
}

async fn assignments(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if params.contains_key("updated_after") {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    }

    let item = |id: u64, started: &str| json!({"data": {"subject_id": id, "started_at": started}});
    let body = match params.get("page_after_id").map(String::as_str) {
        Some("2") => json!({
            "data": [item(3, "2024-01-06T00:00:00.000000Z")],
            "pages": {"next_url": null}
        }),
        _ => json!({
            "data": [
                item(1, "2024-01-05T00:00:00.000000Z"),
                item(2, "2024-01-05T01:00:00.000000Z"),
                {"data": {"subject_id": 99, "started_at": null}}
            ],
            "pages": {"next_url": format!("{}/v2/assignments?page_after_id=2", api.base)}
        }),
    };
    Json(body).into_response()
}

async fn subject(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<u64>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let hit = {
        let mut hits = api.subject_hits.lock().unwrap();
        let count = hits.entry(id).or_insert(0);
        *count += 1;
        *count
    };

    if id == 2 && hit == 1 {
        let reset = Utc::now().timestamp_millis() as f64 / 1000.0;
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("ratelimit-reset", format!("{:.3}", reset))],
            "",
        )
            .into_response();
    }

    Json(json!({
        "id": id,
        "object": "vocabulary",
        "data": {
            "characters": characters(id),
            "meanings": [
                {"meaning": format!("meaning {}", id), "accepted_answer": true},
                {"meaning": "rejected", "accepted_answer": false}
            ],
            "auxiliary_meanings": [{"meaning": "hidden", "type": "blacklist"}],
            "readings": [{"reading": "いち", "accepted_answer": true}],
            "pronunciation_audios": [
                {"url": format!("{}/audio/{}", api.base, id), "content_type": "audio/mpeg"}
            ],
            "parts_of_speech": ["numeral"]
        }
    }))
    .into_response()
}

async fn audio(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    api.audio_auth.lock().unwrap().push(auth);

    ([(header::CONTENT_TYPE, "audio/mpeg")], b"ID3-fake".to_vec()).into_response()
}

async fn spawn_mock_api() -> Arc<MockApi> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let api = Arc::new(MockApi {
        base: format!("http://{}", addr),
        ..Default::default()
    });

    let app = Router::new()
        .route("/v2/assignments", get(assignments))
        .route("/v2/subjects/:id", get(subject))
        .route("/audio/:id", get(audio))
        .with_state(api.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    api
}

fn settings(api: &MockApi, last_sync: Option<chrono::DateTime<Utc>>) -> SyncSettings {
    SyncSettings {
        api_base_url: format!("{}/v2", api.base),
        deck_name: "WaniKani".into(),
        include_audio: true,
        dedup_scope: Default::default(),
        last_sync,
    }
}

async fn engine(
    api: &MockApi,
    collection_path: &Path,
    last_sync: Option<chrono::DateTime<Utc>>,
) -> SyncEngine<ReqwestClient, SystemClock> {
    let fetcher = Fetcher::new(ReqwestClient::new().unwrap(), SystemClock, API_KEY);
    let collection = Collection::open(collection_path).await.unwrap();
    SyncEngine::new(settings(api, last_sync), fetcher, collection)
}

#[tokio::test]
async fn full_import_then_rerun_writes_nothing() {
    let api = spawn_mock_api().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("collection.db");

    let before = Utc::now();
    let mut first = engine(&api, &db_path, None).await;
    let outcome = first.run().await.unwrap();

    assert_eq!(
        outcome.stats,
        SyncStats {
            listed: 3,
            fetched: 3,
            written: 3,
            skipped: 0
        }
    );
    assert!(outcome.watermark >= before);
    assert_eq!(api.hits(2), 2, "rate-limited request is retried once");

    let collection = first.collection();
    let deck = collection.deck_by_name("WaniKani").await.unwrap().unwrap();
    assert_eq!(collection.count_notes(deck.id).await.unwrap(), 3);
    assert_eq!(
        collection.media("二.mp3").await.unwrap(),
        Some(b"ID3-fake".to_vec())
    );
    assert!(api.audio_auth.lock().unwrap().iter().all(Option::is_none));
    drop(first);

    let mut second = engine(&api, &db_path, None).await;
    let rerun = second.run().await.unwrap();

    assert_eq!(rerun.stats.written, 0);
    assert_eq!(rerun.stats.skipped, 3);
    let deck = second
        .collection()
        .deck_by_name("WaniKani")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.collection().count_notes(deck.id).await.unwrap(), 3);
}

#[tokio::test]
async fn fresh_data_advances_watermark_without_writes() {
    let api = spawn_mock_api().await;
    let dir = tempfile::tempdir().unwrap();
    let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let mut engine = engine(&api, &dir.path().join("collection.db"), Some(since)).await;
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.stats, SyncStats::default());
    assert!(outcome.watermark > since);
    assert_eq!(api.hits(1), 0);
}

#[tokio::test]
async fn watermark_is_written_back_to_config() {
    let api = spawn_mock_api().await;
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            "api_key: ${{VOCABSYNC_PIPELINE_TEST_KEY:-{}}}\ndeck_name: WaniKani\ninclude_audio: false\napi_base_url: {}/v2\n",
            API_KEY, api.base
        ),
    )
    .unwrap();
    let config_path = config_path.to_string_lossy().into_owned();

    let cfg = Config::new(&config_path).unwrap();
    let fetcher = Fetcher::new(ReqwestClient::new().unwrap(), SystemClock, cfg.api_key.clone());
    let collection = Collection::open(&cfg.collection_path(dir.path()))
        .await
        .unwrap();
    let mut engine = SyncEngine::new(SyncSettings::from(&cfg), fetcher, collection);

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.stats.written, 3);
    Config::write_last_sync(&config_path, outcome.watermark).unwrap();

    let reloaded = Config::new(&config_path).unwrap();
    assert_eq!(
        reloaded.last_sync.map(|ts| ts.timestamp_micros()),
        Some(outcome.watermark.timestamp_micros())
    );
    let raw = std::fs::read_to_string(&config_path).unwrap();
    assert!(raw.contains("${VOCABSYNC_PIPELINE_TEST_KEY:-test-key}"));
}
