//! The line-oriented HTTP surface over the processor service.
//!
//! All payloads are `text/plain`: semicolon-separated value rows, `k=v`
//! parameter lines and blank-line separated order blocks, matching the
//! charting frontend's wire format.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use chrono::NaiveDateTime;

use crate::adapters::service::{Request, ServiceError, ServiceHandle};
use crate::params::Params;

pub fn router(service: ServiceHandle) -> Router {
    Router::new()
        .route("/api/graphs/{name}/descrs", get(get_descrs))
        .route("/api/graphs/{name}/params", get(get_params).post(post_params))
        .route("/api/graphs/{name}/new", post(post_new))
        .route("/api/graphs/{id}/values", post(post_values))
        .route("/api/orders", get(get_orders))
        .with_state(service)
}

type Reply = Result<String, (StatusCode, String)>;

fn status(error: ServiceError) -> (StatusCode, String) {
    match error {
        ServiceError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        ServiceError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        ServiceError::Internal(message) => {
            error!("internal error: {message}");
            (StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

async fn get_descrs(State(service): State<ServiceHandle>, Path(name): Path<String>) -> Reply {
    service
        .call(|reply| Request::Descrs { name, reply })
        .await
        .map_err(status)
}

async fn get_params(State(service): State<ServiceHandle>, Path(name): Path<String>) -> Reply {
    service
        .call(|reply| Request::DefaultParams { name, reply })
        .await
        .map_err(status)
}

async fn post_new(
    State(service): State<ServiceHandle>,
    Path(name): Path<String>,
    body: String,
) -> Reply {
    let (interval, class_code, sec_code) = parse_new_attrs(&body)?;
    service
        .call(|reply| Request::New {
            name,
            interval,
            class_code,
            sec_code,
            reply,
        })
        .await
        .map_err(status)
}

async fn post_params(
    State(service): State<ServiceHandle>,
    Path(id): Path<String>,
    body: String,
) -> Reply {
    let params = parse_kv_params(&body);
    service
        .call(|reply| Request::SetParams { id, params, reply })
        .await
        .map(|()| String::new())
        .map_err(status)
}

async fn post_values(
    State(service): State<ServiceHandle>,
    Path(id): Path<String>,
    body: String,
) -> Reply {
    let (price, volume, time) = parse_value_lines(&body)?;
    service
        .call(|reply| Request::CalcValues {
            id,
            price,
            volume,
            time,
            reply,
        })
        .await
        .map(|rows| {
            rows.iter()
                .map(|row| match row {
                    None => String::new(),
                    Some(row) => {
                        let mut fields = vec![row.offset.to_string()];
                        fields.extend(row.values.iter().map(|value| match value {
                            None => String::new(),
                            Some(value) => value.to_string(),
                        }));
                        fields.join(";")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .map_err(status)
}

async fn get_orders(State(service): State<ServiceHandle>) -> Reply {
    service
        .call(|reply| Request::Orders { reply })
        .await
        .map_err(status)
}

fn bad_request(message: impl Into<String>) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.into())
}

fn parse_new_attrs(body: &str) -> Result<(i64, String, String), (StatusCode, String)> {
    let mut lines = body.lines();
    let interval = lines
        .next()
        .and_then(|line| line.trim().parse::<i64>().ok())
        .ok_or_else(|| bad_request("invalid interval attribute"))?;
    let class_code = lines
        .next()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or_else(|| bad_request("missing classCode attribute"))?;
    let sec_code = lines
        .next()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or_else(|| bad_request("missing secCode attribute"))?;
    Ok((interval, class_code.to_string(), sec_code.to_string()))
}

fn parse_kv_params(body: &str) -> Params {
    body.lines()
        .filter_map(|line| {
            line.split_once('=').map(|(key, value)| {
                (
                    key.trim().to_string(),
                    serde_json::Value::String(value.to_string()),
                )
            })
        })
        .collect()
}

fn parse_floats(line: &str) -> Result<Vec<Option<f64>>, (StatusCode, String)> {
    line.split(';')
        .map(|field| {
            let field = field.trim();
            if field.is_empty() {
                Ok(None)
            } else {
                field
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| bad_request(format!("invalid value ({field})")))
            }
        })
        .collect()
}

fn parse_time(field: &str) -> Option<NaiveDateTime> {
    field
        .parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(field, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

fn parse_times(line: &str) -> Result<Vec<Option<NaiveDateTime>>, (StatusCode, String)> {
    line.split(';')
        .map(|field| {
            let field = field.trim();
            if field.is_empty() {
                Ok(None)
            } else {
                parse_time(field)
                    .map(Some)
                    .ok_or_else(|| bad_request(format!("invalid time ({field})")))
            }
        })
        .collect()
}

fn parse_value_lines(
    body: &str,
) -> Result<
    (
        Vec<Option<f64>>,
        Vec<Option<f64>>,
        Vec<Option<NaiveDateTime>>,
    ),
    (StatusCode, String),
> {
    let mut lines = body.lines();
    let price = parse_floats(lines.next().ok_or_else(|| bad_request("missing price line"))?)?;
    let volume = parse_floats(lines.next().ok_or_else(|| bad_request("missing volume line"))?)?;
    let time = parse_times(lines.next().ok_or_else(|| bad_request("missing time line"))?)?;
    Ok((price, volume, time))
}
