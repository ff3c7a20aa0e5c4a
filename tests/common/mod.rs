// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process stand-ins for qBittorrent and Jackett.
//!
//! Serves just enough of both APIs for the real clients to run against:
//! cookie-based login with a switchable "reject the next N calls" knob, a
//! mutable torrent table, and a recorder for every mutating call.

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "adminadmin";
pub const JACKETT_KEY: &str = "test-key";

#[derive(Default)]
pub struct StubState {
    /// Login requests received, successful or not.
    pub logins: AtomicUsize,
    /// Answer every login with "Fails." and no cookie.
    pub login_fails: AtomicBool,
    /// The only SID currently accepted.
    pub valid_sid: Mutex<Option<String>>,
    /// Reject this many upcoming authenticated calls with 403.
    pub reject_next: AtomicUsize,
    /// Calls answered with 403.
    pub rejections: AtomicUsize,
    /// Answer `torrents/info` with 500.
    pub info_broken: AtomicBool,
    /// Rewrite `save_path` on `setLocation` like a finished move.
    pub apply_moves: AtomicBool,
    pub torrents: Mutex<Vec<Value>>,
    pub set_location_calls: Mutex<Vec<(String, String)>>,
    pub added: Mutex<Vec<String>>,
    pub paused: Mutex<Vec<String>>,
    pub resumed: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<(String, String)>>,
}

impl StubState {
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn set_location_calls(&self) -> Vec<(String, String)> {
        self.set_location_calls.lock().unwrap().clone()
    }

    pub fn add_torrent(&self, hash: &str, name: &str, save_path: &str, progress: f64) {
        self.torrents.lock().unwrap().push(json!({
            "hash": hash,
            "name": name,
            "save_path": save_path,
            "progress": progress,
            "eta": 8640000,
            "dlspeed": 0,
            "state": if progress >= 1.0 { "uploading" } else { "downloading" },
        }));
    }

    pub fn set_save_path(&self, hash: &str, save_path: &str) {
        for torrent in self.torrents.lock().unwrap().iter_mut() {
            if torrent["hash"] == hash {
                torrent["save_path"] = json!(save_path);
            }
        }
    }

    /// Pass the SID check, or explain why not.
    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        if self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.rejections.fetch_add(1, Ordering::SeqCst);
            return Err(StatusCode::FORBIDDEN.into_response());
        }

        let presented = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|cookies| {
                cookies
                    .split(';')
                    .find_map(|c| c.trim().strip_prefix("SID=").map(str::to_string))
            });

        let valid = self.valid_sid.lock().unwrap().clone();
        match (presented, valid) {
            (Some(presented), Some(valid)) if presented == valid => Ok(()),
            _ => {
                self.rejections.fetch_add(1, Ordering::SeqCst);
                Err(StatusCode::FORBIDDEN.into_response())
            }
        }
    }
}

pub type Stub = Arc<StubState>;

async fn login(State(stub): State<Stub>, Form(form): Form<HashMap<String, String>>) -> Response {
    let n = stub.logins.fetch_add(1, Ordering::SeqCst) + 1;

    let credentials_ok = form.get("username").map(String::as_str) == Some(USERNAME)
        && form.get("password").map(String::as_str) == Some(PASSWORD);
    if stub.login_fails.load(Ordering::SeqCst) || !credentials_ok {
        return (StatusCode::OK, "Fails.").into_response();
    }

    let sid = format!("sid-{}", n);
    *stub.valid_sid.lock().unwrap() = Some(sid.clone());
    (
        StatusCode::OK,
        [(header::SET_COOKIE, format!("SID={}; HttpOnly; SameSite=Strict; path=/", sid))],
        "Ok.",
    )
        .into_response()
}

async fn info(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(rejected) = stub.authorize(&headers) {
        return rejected;
    }
    if stub.info_broken.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }

    let torrents = stub.torrents.lock().unwrap().clone();
    let filtered: Vec<Value> = match query.get("filter").map(String::as_str) {
        Some("completed") => torrents
            .into_iter()
            .filter(|t| t["progress"].as_f64().unwrap_or(0.0) >= 1.0)
            .collect(),
        _ => torrents,
    };
    Json(filtered).into_response()
}

async fn set_location(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Err(rejected) = stub.authorize(&headers) {
        return rejected;
    }
    let hash = form.get("hashes").cloned().unwrap_or_default();
    let location = form.get("location").cloned().unwrap_or_default();
    stub.set_location_calls
        .lock()
        .unwrap()
        .push((hash.clone(), location.clone()));
    if stub.apply_moves.load(Ordering::SeqCst) {
        stub.set_save_path(&hash, &location);
    }
    StatusCode::OK.into_response()
}

async fn add(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Err(rejected) = stub.authorize(&headers) {
        return rejected;
    }
    stub.added
        .lock()
        .unwrap()
        .push(form.get("urls").cloned().unwrap_or_default());
    (StatusCode::OK, "Ok.").into_response()
}

async fn pause(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Err(rejected) = stub.authorize(&headers) {
        return rejected;
    }
    stub.paused
        .lock()
        .unwrap()
        .push(form.get("hashes").cloned().unwrap_or_default());
    StatusCode::OK.into_response()
}

async fn resume(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Err(rejected) = stub.authorize(&headers) {
        return rejected;
    }
    stub.resumed
        .lock()
        .unwrap()
        .push(form.get("hashes").cloned().unwrap_or_default());
    StatusCode::OK.into_response()
}

async fn delete(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Err(rejected) = stub.authorize(&headers) {
        return rejected;
    }
    stub.deleted.lock().unwrap().push((
        form.get("hashes").cloned().unwrap_or_default(),
        form.get("deleteFiles").cloned().unwrap_or_default(),
    ));
    StatusCode::OK.into_response()
}

async fn files(
    State(stub): State<Stub>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(rejected) = stub.authorize(&headers) {
        return rejected;
    }
    let hash = query.get("hash").cloned().unwrap_or_default();
    Json(json!([{ "name": format!("{}/video.mkv", hash), "size": 1024, "progress": 1.0 }])).into_response()
}

async fn jackett_results(Query(query): Query<HashMap<String, String>>) -> Response {
    if query.get("apikey").map(String::as_str) != Some(JACKETT_KEY) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let title = query.get("Query").cloned().unwrap_or_default();
    let category = query.get("Category[]").cloned();
    Json(json!({
        "Results": [{
            "Title": format!("{}.2021.1080p", title),
            "Size": 4_294_967_296u64,
            "Seeders": 42,
            "Peers": 50,
            "Link": null,
            "MagnetUri": "magnet:?xt=urn:btih:abc",
            "Tracker": category.unwrap_or_else(|| "any".to_string()),
            "PublishDate": "2021-06-01T00:00:00"
        }]
    }))
    .into_response()
}

/// Start the stub on an ephemeral port. Returns its base URL.
pub async fn spawn_stub() -> (String, Stub) {
    let stub: Stub = Arc::new(StubState::default());

    let app = Router::new()
        .route("/api/v2/auth/login", post(login))
        .route("/api/v2/torrents/info", get(info))
        .route("/api/v2/torrents/setLocation", post(set_location))
        .route("/api/v2/torrents/add", post(add))
        .route("/api/v2/torrents/pause", post(pause))
        .route("/api/v2/torrents/resume", post(resume))
        .route("/api/v2/torrents/delete", post(delete))
        .route("/api/v2/torrents/files", get(files))
        .route("/api/v2.0/indexers/all/results", get(jackett_results))
        .with_state(stub.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), stub)
}
