//! Outbound occupancy reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::{token_prefix, ClientError, RegistryClient};
use crate::config::Secret;

/// Body of `POST /seats/{n}/detections`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OccupancyReport {
    pub seat_number: u32,
    pub person_detected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Destination for reports. Delivery is fire-and-forget: the monitor logs
/// an error and moves on.
pub trait ReportSink: Send {
    fn send(&mut self, report: &OccupancyReport) -> Result<(), ClientError>;
}

/// Sends reports to the registry over HTTP with the client's bearer token.
///
/// With a login attached, a 401 triggers one fresh credential exchange and
/// the report is sent again under the new token.
pub struct HttpReporter {
    client: RegistryClient,
    login: Option<(String, Secret)>,
}

impl HttpReporter {
    /// The client must already hold a token.
    pub fn new(client: RegistryClient) -> Result<Self, ClientError> {
        if !client.is_authenticated() {
            return Err(ClientError::Unauthenticated);
        }
        Ok(Self {
            client,
            login: None,
        })
    }

    pub fn with_login(mut self, username: impl Into<String>, password: Secret) -> Self {
        self.login = Some((username.into(), password));
        self
    }

    fn reauthenticate(&mut self) -> Result<(), ClientError> {
        let Some((username, password)) = self.login.as_ref() else {
            return Err(ClientError::Unauthenticated);
        };
        let token = self.client.login(username, password.expose())?;
        log::info!(
            "re-authenticated to {} as '{}' (token {}…)",
            self.client.base_url(),
            username,
            token_prefix(&token)
        );
        Ok(())
    }
}

impl ReportSink for HttpReporter {
    fn send(&mut self, report: &OccupancyReport) -> Result<(), ClientError> {
        match self.client.report_detection(report) {
            Err(err) if err.status() == Some(401) && self.login.is_some() => {
                log::warn!("registry rejected bearer token; exchanging credentials again");
                self.reauthenticate()?;
                self.client.report_detection(report).map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn report_serializes_iso_timestamp() {
        let report = OccupancyReport {
            seat_number: 2,
            person_detected: true,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["seat_number"], 2);
        assert_eq!(value["person_detected"], true);
        assert_eq!(value["timestamp"], "2024-03-01T09:05:00Z");
    }

    #[test]
    fn http_reporter_requires_token() {
        let client = RegistryClient::new("http://127.0.0.1:8000", std::time::Duration::from_secs(1));
        assert!(HttpReporter::new(client).is_err());
    }
}
