use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};

use super::{ApiContext, HttpRequest};
use crate::registry::{DetectionOutcome, FieldErrors, RegistryError, SeatUpdate};

const REQUIRED: &str = "This field is required.";

#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            body: serde_json::to_vec(&value).unwrap_or_default(),
        }
    }

    fn error(status: u16, code: &str) -> Self {
        Self::json(status, json!({ "error": code }))
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: Vec::new(),
        }
    }

    fn from_registry_error(err: RegistryError) -> Self {
        let status = err.status_code();
        match err {
            RegistryError::Validation(fields) => Self::json(status, json!(fields)),
            RegistryError::Storage(inner) => {
                log::error!("seat store failure: {:#}", inner);
                Self::error(status, "internal_error")
            }
            RegistryError::SweepInterrupted { released, .. } => Self::json(
                status,
                json!({ "error": "internal_error", "released_seats": released }),
            ),
            other => Self::error(status, &other.to_string()),
        }
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Dispatch one request.
pub fn route(request: &HttpRequest, ctx: &ApiContext) -> ApiResponse {
    let path = request.path.trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let method = request.method.as_str();

    match segments.as_slice() {
        ["health"] => {
            if method != "GET" {
                return ApiResponse::error(405, "method_not_allowed");
            }
            ApiResponse::json(200, json!({ "status": "ok" }))
        }
        ["api-token-auth"] => {
            if method != "POST" {
                return ApiResponse::error(405, "method_not_allowed");
            }
            token_exchange(request, ctx)
        }
        ["seats", rest @ ..] => {
            if request.has_query_token() {
                return ApiResponse::error(400, "token_query_param_not_allowed");
            }
            if let Err(response) = authorize(request, ctx) {
                return response;
            }
            seats(method, rest, request, ctx)
        }
        _ => ApiResponse::error(404, "not_found"),
    }
}

fn authorize(request: &HttpRequest, ctx: &ApiContext) -> Result<String, ApiResponse> {
    let token = request
        .bearer_token()
        .ok_or_else(|| ApiResponse::error(401, "missing_token"))?;
    ctx.tokens
        .validate(&token, ctx.registry.now())
        .map_err(|err| {
            log::warn!("seat api rejected bearer token: {}", err);
            ApiResponse::error(401, "invalid_token")
        })
}

fn seats(method: &str, rest: &[&str], request: &HttpRequest, ctx: &ApiContext) -> ApiResponse {
    let registry = &ctx.registry;
    let result = match (method, rest) {
        ("GET", []) => registry
            .list()
            .map(|seats| ApiResponse::json(200, json!(seats))),
        ("POST", []) => create_seat(request, ctx),
        ("POST", ["auto_release_check"]) => auto_release_check(request, ctx),
        (_, [] | ["auto_release_check"]) => return ApiResponse::error(405, "method_not_allowed"),
        (_, [number, tail @ ..]) => {
            let Some(seat_number) = parse_seat_number(number) else {
                return ApiResponse::error(404, "not_found");
            };
            match (method, tail) {
                ("GET", []) => registry
                    .get(seat_number)
                    .map(|seat| ApiResponse::json(200, json!(seat))),
                ("PUT" | "PATCH", []) => update_seat(seat_number, request, ctx),
                ("DELETE", []) => registry
                    .delete(seat_number)
                    .map(|_| ApiResponse::no_content()),
                ("POST", ["reserve"]) => reserve(seat_number, request, ctx),
                ("POST", ["release"]) => registry.release(seat_number, false).map(|seat| {
                    ApiResponse::json(
                        200,
                        json!({
                            "message": format!("Seat {} released", seat_number),
                            "seat": seat,
                        }),
                    )
                }),
                ("POST", ["detections"]) => detection(seat_number, request, ctx),
                (_, [] | ["reserve"] | ["release"] | ["detections"]) => {
                    return ApiResponse::error(405, "method_not_allowed")
                }
                _ => return ApiResponse::error(404, "not_found"),
            }
        }
    };
    result.unwrap_or_else(ApiResponse::from_registry_error)
}

fn parse_seat_number(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|n| *n > 0)
}

/// Parse the body as a JSON object. An empty body counts as `{}`.
fn body_object(request: &HttpRequest) -> Result<Map<String, Value>, RegistryError> {
    if request.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(&request.body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(RegistryError::field(
            "non_field_errors",
            "Invalid data. Expected a dictionary.",
        )),
        Err(err) => Err(RegistryError::field(
            "detail",
            format!("JSON parse error - {}", err),
        )),
    }
}

fn token_exchange(request: &HttpRequest, ctx: &ApiContext) -> ApiResponse {
    let body = match body_object(request) {
        Ok(body) => body,
        Err(err) => return ApiResponse::from_registry_error(err),
    };
    let mut errors = FieldErrors::new();
    let username = required_str(&body, "username", &mut errors);
    let password = required_str(&body, "password", &mut errors);
    if !errors.is_empty() {
        return ApiResponse::from_registry_error(RegistryError::Validation(errors));
    }
    let (username, password) = (username.unwrap_or_default(), password.unwrap_or_default());
    match ctx.tokens.exchange(username, password, ctx.registry.now()) {
        Some(token) => {
            log::info!("issued bearer token to '{}'", username);
            ApiResponse::json(200, json!({ "access": token }))
        }
        None => {
            log::warn!("credential exchange failed for '{}'", username);
            ApiResponse::json(
                401,
                json!({ "detail": "No active account found with the given credentials" }),
            )
        }
    }
}

fn required_str<'a>(
    body: &'a Map<String, Value>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<&'a str> {
    match body.get(field) {
        Some(Value::String(value)) if !value.is_empty() => Some(value.as_str()),
        Some(Value::String(_)) => {
            errors.insert(field.to_string(), vec!["This field may not be blank.".to_string()]);
            None
        }
        Some(_) => {
            errors.insert(field.to_string(), vec!["Not a valid string.".to_string()]);
            None
        }
        None => {
            errors.insert(field.to_string(), vec![REQUIRED.to_string()]);
            None
        }
    }
}

fn create_seat(request: &HttpRequest, ctx: &ApiContext) -> Result<ApiResponse, RegistryError> {
    let body = body_object(request)?;
    let seat_number = match body.get("seat_number") {
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| RegistryError::field("seat_number", "A valid integer is required."))?,
        None => return Err(RegistryError::field("seat_number", REQUIRED)),
    };
    let seat = ctx.registry.create(seat_number)?;
    Ok(ApiResponse::json(201, json!(seat)))
}

fn update_seat(
    seat_number: u32,
    request: &HttpRequest,
    ctx: &ApiContext,
) -> Result<ApiResponse, RegistryError> {
    let body = body_object(request)?;
    let update: SeatUpdate = serde_json::from_value(Value::Object(body))
        .map_err(|err| RegistryError::field("non_field_errors", err.to_string()))?;
    let seat = ctx.registry.update(seat_number, update)?;
    Ok(ApiResponse::json(200, json!(seat)))
}

fn reserve(
    seat_number: u32,
    request: &HttpRequest,
    ctx: &ApiContext,
) -> Result<ApiResponse, RegistryError> {
    let body = body_object(request)?;
    let user_name = match body.get("user_name") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name.as_str()),
        Some(_) => return Err(RegistryError::field("user_name", "Not a valid string.")),
    };
    let seat = ctx.registry.reserve(seat_number, user_name)?;
    Ok(ApiResponse::json(
        200,
        json!({
            "message": format!("Seat {} reserved", seat_number),
            "seat": seat,
        }),
    ))
}

/// Validated `POST /seats/{n}/detections` body.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DetectionReportBody {
    pub seat_number: u32,
    pub person_detected: bool,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn parse_detection_report(
    body: &Map<String, Value>,
) -> Result<DetectionReportBody, RegistryError> {
    let mut errors = FieldErrors::new();
    let mut push = |field: &str, msg: &str| {
        errors
            .entry(field.to_string())
            .or_default()
            .push(msg.to_string());
    };

    let seat_number = match body.get("seat_number") {
        None => {
            push("seat_number", REQUIRED);
            None
        }
        Some(value) => {
            let parsed = value.as_u64().and_then(|n| u32::try_from(n).ok());
            if parsed.is_none() {
                push("seat_number", "A valid integer is required.");
            }
            parsed
        }
    };
    let person_detected = match body.get("person_detected") {
        None => {
            push("person_detected", REQUIRED);
            None
        }
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            push("person_detected", "Must be a valid boolean.");
            None
        }
    };
    let timestamp = match body.get("timestamp") {
        None => {
            push("timestamp", REQUIRED);
            None
        }
        Some(Value::String(raw)) => {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                push(
                    "timestamp",
                    "Datetime has wrong format. Use an ISO 8601 date-time.",
                );
            }
            parsed
        }
        Some(_) => {
            push(
                "timestamp",
                "Datetime has wrong format. Use an ISO 8601 date-time.",
            );
            None
        }
    };

    match (seat_number, person_detected, timestamp) {
        (Some(seat_number), Some(person_detected), Some(timestamp)) if errors.is_empty() => {
            Ok(DetectionReportBody {
                seat_number,
                person_detected,
                timestamp,
            })
        }
        _ => Err(RegistryError::Validation(errors)),
    }
}

/// RFC 3339, or a naive ISO 8601 date-time taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn detection(
    seat_number: u32,
    request: &HttpRequest,
    ctx: &ApiContext,
) -> Result<ApiResponse, RegistryError> {
    let body = body_object(request)?;
    let report = parse_detection_report(&body)?;
    if report.seat_number != seat_number {
        return Err(RegistryError::field(
            "seat_number",
            format!("Does not match seat {} in the path.", seat_number),
        ));
    }
    let outcome =
        ctx.registry
            .ingest_detection(seat_number, report.person_detected, report.timestamp)?;
    Ok(match outcome {
        DetectionOutcome::Updated(seat) => ApiResponse::json(
            200,
            json!({
                "message": format!("Seat {} detection updated", seat_number),
                "seat": seat,
            }),
        ),
        DetectionOutcome::NoPerson => {
            ApiResponse::json(200, json!({ "message": "No person detected" }))
        }
    })
}

fn auto_release_check(request: &HttpRequest, ctx: &ApiContext) -> Result<ApiResponse, RegistryError> {
    let body = body_object(request)?;
    let minutes = match body.get("minutes") {
        None | Some(Value::Null) => ctx.auto_release_minutes,
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| RegistryError::field("minutes", "A valid integer is required."))?,
    };
    let released = ctx.registry.auto_release_sweep(minutes)?;
    Ok(ApiResponse::json(
        200,
        json!({
            "message": format!("{} seats auto-released", released.len()),
            "count": released.len(),
            "released_seats": released,
        }),
    ))
}
