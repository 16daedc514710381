//! HTTP surface of the sync protocol
//!
//! - `HEAD /hotset/latest-version`: head version in the `Latest-Version` header
//! - `GET /hotset/{version}`: `{ record }` fast-forwarding `version` to the
//!   head, with that head in the `Latest-Version` header
//! - `GET /hotset/record/{version}`: the stored row, for diagnostics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, head};
use axum::{Json, Router};
use lg_core::hotset::HotsetEnvelope;
use serde::Serialize;
use tokio::net::TcpListener;

use crate::ledger::{HotsetLedger, HotsetVersion, LedgerError};

/// Header carrying the head version on the probe response.
pub const LATEST_VERSION_HEADER: &str = "latest-version";

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct RawEnvelope {
    record: HotsetVersion,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match &self {
            LedgerError::Empty | LedgerError::VersionNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::SnapshotTooLarge { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("Hotset request failed: {}", self);
        }
        let error = if status == StatusCode::NOT_FOUND {
            "Version not found".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

/// Routes for the sync protocol, bound to one ledger.
pub fn router(ledger: Arc<HotsetLedger>) -> Router {
    Router::new()
        .route("/hotset/latest-version", head(latest_version))
        .route("/hotset/record/{version}", get(raw_record))
        .route("/hotset/{version}", get(record_for_version))
        .with_state(ledger)
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, ledger: Arc<HotsetLedger>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("Hotset server listening on {}", addr);
    }
    axum::serve(listener, router(ledger)).await
}

fn version_header(version: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(LATEST_VERSION_HEADER),
        HeaderValue::from(version),
    );
    headers
}

async fn latest_version(State(ledger): State<Arc<HotsetLedger>>) -> Result<HeaderMap, LedgerError> {
    Ok(version_header(ledger.latest_version()?))
}

async fn record_for_version(
    State(ledger): State<Arc<HotsetLedger>>,
    Path(version): Path<u64>,
) -> Result<(HeaderMap, Json<HotsetEnvelope>), LedgerError> {
    let start = Instant::now();
    let result = ledger.record_for_version(version);
    match &result {
        Ok(fetched) => log::info!(
            "GET /hotset/{} -> {} to v{} ({:?})",
            version,
            if fetched.record.is_snapshot() { "snapshot" } else { "delta" },
            fetched.head,
            start.elapsed()
        ),
        Err(e) => log::warn!("GET /hotset/{} -> {} ({:?})", version, e, start.elapsed()),
    }
    let fetched = result?;
    Ok((
        version_header(fetched.head),
        Json(HotsetEnvelope {
            record: fetched.record,
        }),
    ))
}

async fn raw_record(
    State(ledger): State<Arc<HotsetLedger>>,
    Path(version): Path<u64>,
) -> Result<Json<RawEnvelope>, LedgerError> {
    let record = ledger.raw_record(version)?;
    log::debug!("GET /hotset/record/{}", version);
    Ok(Json(RawEnvelope { record }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerConfig;
    use crate::storage::MemoryStorage;

    async fn spawn_server(ledger: Arc<HotsetLedger>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, ledger));
        format!("http://{}", addr)
    }

    fn ledger() -> Arc<HotsetLedger> {
        Arc::new(HotsetLedger::open(LedgerConfig::default(), Arc::new(MemoryStorage::new())).unwrap())
    }

    #[tokio::test]
    async fn test_probe_on_empty_ledger_is_404() {
        let base = spawn_server(ledger()).await;
        let response = reqwest::Client::new()
            .head(format!("{}/hotset/latest-version", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_probe_and_fetch() {
        let ledger = ledger();
        ledger.publish(vec!["a.com".into()], vec!["x.com".into()]).unwrap();
        ledger.publish(vec!["b.com".into()], vec!["x.com".into()]).unwrap();
        let base = spawn_server(ledger).await;
        let client = reqwest::Client::new();

        let probe = client.head(format!("{}/hotset/latest-version", base)).send().await.unwrap();
        assert_eq!(probe.status(), reqwest::StatusCode::OK);
        assert_eq!(probe.headers()["latest-version"], "2");

        let response = client.get(format!("{}/hotset/1", base)).send().await.unwrap();
        assert_eq!(response.headers()["latest-version"], "2");
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["record"]["whiteSnapshot"].is_null());
        assert_eq!(body["record"]["whiteAdd"][0], "b.com");
        assert_eq!(body["record"]["whiteRemove"][0], "a.com");

        let body: serde_json::Value = client
            .get(format!("{}/hotset/0", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["record"]["whiteSnapshot"][0], "b.com");

        let missing = client.get(format!("{}/hotset/9", base)).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let invalid = client.get(format!("{}/hotset/-1", base)).send().await.unwrap();
        assert_eq!(invalid.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_raw_record() {
        let ledger = ledger();
        ledger.publish(vec!["a.com".into()], vec![]).unwrap();
        let base = spawn_server(ledger).await;

        let body: serde_json::Value = reqwest::get(format!("{}/hotset/record/1", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["record"]["version"], 1);
        assert_eq!(body["record"]["whiteSnapshot"][0], "a.com");
        assert!(body["record"]["whiteAdd"].is_null());
    }
}
