//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::http::{Clock, HttpClient, RawResponse};

/// A clock that only moves when something sleeps on it.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub bearer: Option<String>,
    pub at: DateTime<Utc>,
}

/// Replays queued responses per URL and records every request with the
/// clock time it was issued at.
#[derive(Clone)]
pub struct ScriptedHttp {
    clock: ManualClock,
    routes: Arc<Mutex<HashMap<String, VecDeque<RawResponse>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedHttp {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            routes: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, url: &str, response: RawResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn push_json(&self, url: &str, status: u16, body: serde_json::Value) {
        self.push(url, RawResponse::new(status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

impl HttpClient for ScriptedHttp {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<RawResponse, String> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            bearer: bearer.map(str::to_string),
            at: self.clock.now(),
        });

        self.routes
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| format!("no scripted response for {}", url))
    }
}

pub fn vocabulary_subject(characters: &str) -> serde_json::Value {
    serde_json::json!({
        "id": 1,
        "object": "vocabulary",
        "data": {
            "characters": characters,
            "meanings": [{"meaning": "One Thing", "primary": true, "accepted_answer": true}],
            "auxiliary_meanings": [],
            "readings": [{"reading": "ひとつ", "primary": true, "accepted_answer": true}],
            "pronunciation_audios": [
                {"url": format!("https://cdn.test/{}.mp3", characters), "content_type": "audio/mpeg"}
            ],
            "parts_of_speech": ["noun"]
        }
    })
}
