//! Blocking HTTP client for the seat registry API.
//!
//! Used by the edge monitor (token exchange + detection reports) and by
//! `seatctl`. Every request is bounded by the agent timeout; nothing is
//! retried.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::registry::Seat;
use crate::report::OccupancyReport;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error {0}: {1}")]
    Status(u16, String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("not authenticated; call login first")]
    Unauthenticated,
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status(code, _) => Some(*code),
            _ => None,
        }
    }
}

impl From<ureq::Error> for ClientError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, response) => {
                let body = response.into_string().unwrap_or_default();
                ClientError::Status(code, body)
            }
            ureq::Error::Transport(transport) => ClientError::Transport(transport.to_string()),
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: Option<String>,
    token: Option<String>,
}

/// `{message, seat}` envelope returned by reserve, release and detections.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SeatMessage {
    pub message: String,
    pub seat: Option<Seat>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SweepSummary {
    pub message: String,
    pub count: usize,
    pub released_seats: Vec<u32>,
}

pub struct RegistryClient {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, method: &str, path: &str) -> ClientResult<ureq::Request> {
        let token = self.token.as_deref().ok_or(ClientError::Unauthenticated)?;
        Ok(self
            .agent
            .request(method, &self.url(path))
            .set("Authorization", &format!("Bearer {}", token)))
    }

    fn decode<T: DeserializeOwned>(response: ureq::Response) -> ClientResult<T> {
        response
            .into_json::<T>()
            .map_err(|err| ClientError::Decode(err.to_string()))
    }

    /// Exchange credentials for a bearer token and keep it for later calls.
    pub fn login(&mut self, username: &str, password: &str) -> ClientResult<String> {
        let response = self
            .agent
            .post(&self.url("/api-token-auth"))
            .send_json(json!({ "username": username, "password": password }))?;
        let body: TokenResponse = Self::decode(response)?;
        let token = body
            .access
            .or(body.token)
            .ok_or_else(|| ClientError::Decode("token response has no access field".into()))?;
        self.token = Some(token.clone());
        Ok(token)
    }

    pub fn report_detection(&self, report: &OccupancyReport) -> ClientResult<SeatMessage> {
        let response = self
            .authorized("POST", &format!("/seats/{}/detections", report.seat_number))?
            .send_json(report)?;
        Self::decode(response)
    }

    pub fn list(&self) -> ClientResult<Vec<Seat>> {
        Self::decode(self.authorized("GET", "/seats")?.call()?)
    }

    pub fn get(&self, seat_number: u32) -> ClientResult<Seat> {
        Self::decode(self.authorized("GET", &format!("/seats/{}", seat_number))?.call()?)
    }

    pub fn create(&self, seat_number: u32) -> ClientResult<Seat> {
        let response = self
            .authorized("POST", "/seats")?
            .send_json(json!({ "seat_number": seat_number }))?;
        Self::decode(response)
    }

    /// Partial update; `fields` is sent as the PATCH body.
    pub fn update(&self, seat_number: u32, fields: &Value) -> ClientResult<Seat> {
        let response = self
            .authorized("PATCH", &format!("/seats/{}", seat_number))?
            .send_json(fields)?;
        Self::decode(response)
    }

    pub fn delete(&self, seat_number: u32) -> ClientResult<()> {
        self.authorized("DELETE", &format!("/seats/{}", seat_number))?
            .call()?;
        Ok(())
    }

    pub fn reserve(&self, seat_number: u32, user_name: Option<&str>) -> ClientResult<SeatMessage> {
        let body = match user_name {
            Some(name) => json!({ "user_name": name }),
            None => json!({}),
        };
        let response = self
            .authorized("POST", &format!("/seats/{}/reserve", seat_number))?
            .send_json(body)?;
        Self::decode(response)
    }

    pub fn release(&self, seat_number: u32) -> ClientResult<SeatMessage> {
        let response = self
            .authorized("POST", &format!("/seats/{}/release", seat_number))?
            .send_json(json!({}))?;
        Self::decode(response)
    }

    pub fn auto_release_check(&self, minutes: Option<u32>) -> ClientResult<SweepSummary> {
        let body = match minutes {
            Some(minutes) => json!({ "minutes": minutes }),
            None => json!({}),
        };
        let response = self
            .authorized("POST", "/seats/auto_release_check")?
            .send_json(body)?;
        Self::decode(response)
    }
}

/// First characters of a token, for log lines.
pub fn token_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(token.len());
    &token[..end]
}
