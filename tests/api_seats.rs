use anyhow::Result;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use seatwatch::api::{ApiConfig, ApiHandle, ApiServer};
use seatwatch::auth::{OperatorCredential, TokenManager};
use seatwatch::registry::InMemorySeatStore;
use seatwatch::{Clock, ManualClock, SeatRegistry};

struct TestApi {
    handle: Option<ApiHandle>,
    clock: Arc<ManualClock>,
    registry: Arc<SeatRegistry>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let registry = Arc::new(SeatRegistry::with_clock(
            Box::new(InMemorySeatStore::new()),
            clock.clone() as Arc<dyn Clock>,
        ));
        registry.provision(&[1, 2, 3, 4])?;
        let tokens = Arc::new(TokenManager::new(
            &[OperatorCredential::from_password("librarian", "correct horse")],
            Duration::from_secs(3600),
        )?);
        let cfg = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        };
        let handle = ApiServer::new(cfg, registry.clone(), tokens).spawn()?;
        Ok(Self {
            handle: Some(handle),
            clock,
            registry,
        })
    }

    fn send(&self, method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> Result<(u16, Value)> {
        let addr = self.handle.as_ref().map(|h| h.addr).unwrap();
        let mut stream = TcpStream::connect(addr)?;
        let body = body.map(|v| v.to_string()).unwrap_or_default();
        let mut request = format!(
            "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
            body.len()
        );
        if let Some(token) = token {
            request.push_str(&format!("Authorization: Bearer {token}\r\n"));
        }
        request.push_str("\r\n");
        request.push_str(&body);
        stream.write_all(request.as_bytes())?;

        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        let mut parts = response.splitn(2, "\r\n\r\n");
        let head = parts.next().unwrap_or("");
        let payload = parts.next().unwrap_or("");
        let status: u16 = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let value = if payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(payload)?
        };
        Ok((status, value))
    }

    fn login(&self) -> Result<String> {
        let (status, body) = self.send(
            "POST",
            "/api-token-auth/",
            None,
            Some(json!({"username": "librarian", "password": "correct horse"})),
        )?;
        assert_eq!(status, 200);
        Ok(body["access"].as_str().unwrap().to_string())
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop();
        }
    }
}

#[test]
fn health_is_public_and_seats_need_a_token() -> Result<()> {
    let api = TestApi::new()?;
    let (status, body) = api.send("GET", "/health", None, None)?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = api.send("GET", "/seats/", None, None)?;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "missing_token");

    let (status, _) = api.send(
        "POST",
        "/api-token-auth/",
        None,
        Some(json!({"username": "librarian", "password": "wrong"})),
    )?;
    assert_eq!(status, 401);
    Ok(())
}

#[test]
fn reserve_detect_and_auto_release_over_http() -> Result<()> {
    let api = TestApi::new()?;
    let token = api.login()?;
    let t0 = api.clock.now();

    let (status, body) = api.send(
        "POST",
        "/seats/1/reserve/",
        Some(&token),
        Some(json!({"user_name": "alice"})),
    )?;
    assert_eq!(status, 200);
    assert_eq!(body["seat"]["status"], "occupied");
    assert_eq!(body["seat"]["user_name"], "alice");

    let (status, body) = api.send("POST", "/seats/1/reserve/", Some(&token), None)?;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Seat is not available");

    api.clock.advance(ChronoDuration::minutes(5));
    let (status, body) = api.send(
        "POST",
        "/seats/1/detections/",
        Some(&token),
        Some(json!({
            "seat_number": 1,
            "person_detected": true,
            "timestamp": "2020-01-01T00:00:00",
        })),
    )?;
    assert_eq!(status, 200);
    let detected: chrono::DateTime<Utc> =
        serde_json::from_value(body["seat"]["last_detected_at"].clone())?;
    assert_eq!(detected, t0 + ChronoDuration::minutes(5));

    api.clock.advance(ChronoDuration::minutes(16));
    let (status, body) = api.send(
        "POST",
        "/seats/auto_release_check/",
        Some(&token),
        Some(json!({"minutes": 15})),
    )?;
    assert_eq!(status, 200);
    assert_eq!(body["count"], 1);
    assert_eq!(body["released_seats"], json!([1]));
    assert_eq!(body["message"], "1 seats auto-released");

    let (status, body) = api.send("GET", "/seats/1/", Some(&token), None)?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "empty");
    assert_eq!(body["auto_released"], true);
    assert_eq!(body["user_name"], Value::Null);
    Ok(())
}

#[test]
fn release_on_empty_seat_is_conflict_and_unknown_seat_is_404() -> Result<()> {
    let api = TestApi::new()?;
    let token = api.login()?;
    let before = api.registry.get(2)?;

    let (status, body) = api.send("POST", "/seats/2/release/", Some(&token), None)?;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Seat is not occupied");
    assert_eq!(api.registry.get(2)?, before);

    let (status, _) = api.send("POST", "/seats/42/release/", Some(&token), None)?;
    assert_eq!(status, 404);
    let (status, _) = api.send("GET", "/nowhere", Some(&token), None)?;
    assert_eq!(status, 404);
    Ok(())
}

#[test]
fn crud_lifecycle() -> Result<()> {
    let api = TestApi::new()?;
    let token = api.login()?;

    let (status, body) = api.send("POST", "/seats/", Some(&token), Some(json!({"seat_number": 9})))?;
    assert_eq!(status, 201);
    assert_eq!(body["status"], "empty");

    let (status, body) = api.send("GET", "/seats/", Some(&token), None)?;
    assert_eq!(status, 200);
    let numbers: Vec<u64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["seat_number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 9]);

    let (status, body) = api.send(
        "PATCH",
        "/seats/9/",
        Some(&token),
        Some(json!({"status": "occupied", "user_name": "bob"})),
    )?;
    assert_eq!(status, 400, "occupied without reserved_at must be rejected: {body}");

    let (status, _) = api.send("DELETE", "/seats/9/", Some(&token), None)?;
    assert_eq!(status, 204);
    let (status, _) = api.send("DELETE", "/seats/9/", Some(&token), None)?;
    assert_eq!(status, 404);
    Ok(())
}

#[test]
fn tokens_in_query_string_are_rejected() -> Result<()> {
    let api = TestApi::new()?;
    let token = api.login()?;
    let (status, _) = api.send("GET", &format!("/seats/?token={token}"), None, None)?;
    assert_eq!(status, 400);
    Ok(())
}
