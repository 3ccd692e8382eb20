use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use crate::pricing::{
    normalize_code, supported_currencies, CurrencyInfo, LocationResult, PricingQuote,
    PricingResolver, BASE_CURRENCY,
};

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

/// Run a resolver call on the blocking pool; upstream HTTP is synchronous.
async fn with_resolver<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&PricingResolver) -> T + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state.resolver))
        .await
        .map_err(|e| {
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("resolver task failed: {}", e),
            )
        })
}

fn required_code(value: Option<&str>, name: &str) -> Result<String, ApiError> {
    value
        .map(normalize_code)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Missing '{}' parameter", name),
            )
        })
}

// ─── Client address ──────────────────────────────────────────────

/// Public address of the requesting client, if one can be determined.
///
/// Proxy headers win over the socket peer (`X-Forwarded-For` first entry,
/// then `X-Real-IP`). Loopback and private addresses yield `None`: such a
/// client shares the server's network, so the server's own location is
/// the best answer.
pub struct ClientIp(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let ip = forwarded_ip(&parts.headers).or(peer);
        Ok(ClientIp(ip.filter(is_public)))
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .or_else(|| header("x-real-ip").and_then(|ip| ip.trim().parse().ok()))
}

fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_public(&IpAddr::V4(v4));
            }
            let unique_local = (v6.segments()[0] & 0xfe00) == 0xfc00;
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

// ─── GET /health ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── GET /api/pricing ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PricingParams {
    pub currency: Option<String>,
}

#[derive(Serialize)]
pub struct PricingResponse {
    #[serde(flatten)]
    pub quote: PricingQuote,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationResult>,
}

pub async fn pricing(
    State(state): State<Arc<AppState>>,
    ClientIp(client): ClientIp,
    Query(params): Query<PricingParams>,
) -> Result<Json<PricingResponse>, ApiError> {
    let start = Instant::now();
    let requested = params
        .currency
        .as_deref()
        .map(normalize_code)
        .filter(|c| !c.is_empty());

    let response = match requested {
        Some(code) => PricingResponse {
            quote: state.resolver.quote(&code),
            location: None,
        },
        None => {
            let (location, quote) =
                with_resolver(&state, move |r| r.quote_for_client(client)).await?;
            PricingResponse {
                quote,
                location: Some(location),
            }
        }
    };

    tracing::info!(
        currency = %response.quote.currency,
        rule = %response.quote.rule,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "GET /api/pricing"
    );
    Ok(Json(response))
}

// ─── GET /api/convert ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ConvertParams {
    pub amount: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Serialize)]
pub struct ConvertResponse {
    pub amount: f64,
    pub from: String,
    pub to: String,
    pub converted: f64,
    pub formatted: String,
}

pub async fn convert(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConvertParams>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let start = Instant::now();
    let raw = params
        .amount
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Missing 'amount' parameter"))?;
    let amount: f64 = raw
        .parse()
        .ok()
        .filter(|a: &f64| a.is_finite())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("Invalid amount '{}'", raw)))?;
    let from = required_code(params.from.as_deref(), "from")?;
    let to = required_code(params.to.as_deref(), "to")?;

    let (f, t) = (from.clone(), to.clone());
    let converted = with_resolver(&state, move |r| r.convert(amount, &f, &t)).await?;
    if !converted.is_finite() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Amount {} is out of range for {} to {}", amount, from, to),
        ));
    }

    tracing::info!(
        %from, %to, amount, converted,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "GET /api/convert"
    );
    Ok(Json(ConvertResponse {
        amount,
        formatted: state.resolver.format_price(converted, &to),
        from,
        to,
        converted,
    }))
}

// ─── GET /api/location ───────────────────────────────────────────

pub async fn location(
    State(state): State<Arc<AppState>>,
    ClientIp(client): ClientIp,
) -> Result<Json<LocationResult>, ApiError> {
    let loc = with_resolver(&state, move |r| r.resolve_location_of(client)).await?;
    tracing::info!(
        country = %loc.country_code,
        currency = %loc.currency_code,
        "GET /api/location"
    );
    Ok(Json(loc))
}

// ─── GET /api/currencies ─────────────────────────────────────────

pub async fn currencies() -> Json<Vec<CurrencyInfo>> {
    Json(supported_currencies())
}

// ─── GET /api/rates ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct RatesResponse {
    pub base: &'static str,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    pub rates: HashMap<String, f64>,
}

pub async fn rates(State(state): State<Arc<AppState>>) -> Result<Json<RatesResponse>, ApiError> {
    let snapshot = with_resolver(&state, |r| r.rates_snapshot()).await?;
    tracing::info!(count = snapshot.table.len(), "GET /api/rates");
    Ok(Json(RatesResponse {
        base: BASE_CURRENCY,
        count: snapshot.table.len(),
        fetched_at: snapshot.fetched_at,
        rates: snapshot.table.as_map().clone(),
    }))
}
