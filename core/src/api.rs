//! Registry HTTP surface — single-endpoint action dispatch plus health
//! and status pages.
//!
//! `POST /api` carries a JSON body with an `action` discriminator
//! (`register`, `list`, `remove`, `health`); `GET /health` and `GET /`
//! are read-only diagnostics. Routing is warp filters, same shape as
//! any of our other HTTP surfaces.

use crate::peer::PeerRecord;
use crate::registry::{PeerRegistry, RegistryError};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Reply};

/// Wire form of a listed peer. The registry's internal `source` field
/// is not part of the API contract.
#[derive(Debug, Serialize)]
struct PeerEntry {
    peer_id: String,
    address: String,
    last_seen: u64,
}

impl From<PeerRecord> for PeerEntry {
    fn from(record: PeerRecord) -> Self {
        Self {
            peer_id: record.peer_id,
            address: record.address,
            last_seen: record.last_seen,
        }
    }
}

/// Route a decoded `/api` request body to the matching registry
/// operation.
pub fn dispatch(registry: &PeerRegistry, body: &Value) -> Result<Value, RegistryError> {
    let action = body
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| RegistryError::InvalidRequest("missing action".into()))?;

    match action {
        "register" => {
            let peer_id = require_str(body, "peer_id")?;
            let address = require_str(body, "address")?;
            registry.register_or_update(peer_id, address)?;
            Ok(json!({ "ok": true }))
        }
        "list" => {
            let peers: Vec<PeerEntry> = registry
                .list_peers()
                .into_iter()
                .map(PeerEntry::from)
                .collect();
            Ok(json!({ "peers": peers }))
        }
        "remove" => {
            let peer_id = require_str(body, "peer_id")?;
            registry.remove(peer_id)?;
            Ok(json!({ "ok": true }))
        }
        "health" => {
            let health = registry.health();
            Ok(json!({
                "peer_count": health.peer_count,
                "uptime_seconds": health.uptime_seconds,
            }))
        }
        other => Err(RegistryError::UnsupportedAction(other.to_string())),
    }
}

fn require_str<'a>(body: &'a Value, field: &str) -> Result<&'a str, RegistryError> {
    match body.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(RegistryError::InvalidRequest(format!("missing {field}"))),
    }
}

fn error_status(err: &RegistryError) -> StatusCode {
    match err {
        RegistryError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn error_body(err: &RegistryError) -> Value {
    match err {
        RegistryError::NotFound => json!({ "error": "not_found" }),
        other => json!({ "error": other.to_string() }),
    }
}

/// Build the relay's warp routes: `POST /api`, `GET /health`, `GET /`.
pub fn routes(
    registry: Arc<PeerRegistry>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    let with_registry = warp::any().map(move || Arc::clone(&registry));

    let api = warp::path("api")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_registry.clone())
        .map(|body: Value, registry: Arc<PeerRegistry>| {
            match dispatch(&registry, &body) {
                Ok(value) => {
                    warp::reply::with_status(warp::reply::json(&value), StatusCode::OK)
                        .into_response()
                }
                Err(err) => warp::reply::with_status(
                    warp::reply::json(&error_body(&err)),
                    error_status(&err),
                )
                .into_response(),
            }
        });

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_registry.clone())
        .map(|registry: Arc<PeerRegistry>| {
            warp::reply::json(&registry.health()).into_response()
        });

    let index = warp::path::end()
        .and(warp::get())
        .and(with_registry)
        .map(|registry: Arc<PeerRegistry>| {
            warp::reply::html(status_page(&registry)).into_response()
        });

    api.or(health).or(index)
}

/// Human-readable status page. Diagnostic only, not a contract.
fn status_page(registry: &PeerRegistry) -> String {
    let health = registry.health();
    let rows: String = registry
        .list_peers()
        .into_iter()
        .map(|p| format!("<li>{} ({})</li>", p.peer_id, p.address))
        .collect();

    format!(
        "<h1>Peerlink Relay</h1>\
         <p>Status: running</p>\
         <p>Active peers: {}</p>\
         <p>Uptime: {}s</p>\
         <ul>{}</ul>",
        health.peer_count, health.uptime_seconds, rows
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;

    fn test_registry() -> PeerRegistry {
        PeerRegistry::new(RegistryConfig::default())
    }

    #[test]
    fn test_register_then_list_then_remove_scenario() {
        let registry = test_registry();

        let response = dispatch(
            &registry,
            &json!({ "action": "register", "peer_id": "A", "address": "10.0.0.5:12345" }),
        )
        .unwrap();
        assert_eq!(response, json!({ "ok": true }));

        let listed = dispatch(&registry, &json!({ "action": "list" })).unwrap();
        let peers = listed["peers"].as_array().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0]["peer_id"], "A");
        assert_eq!(peers[0]["address"], "10.0.0.5:12345");
        assert!(peers[0]["last_seen"].as_u64().is_some());

        let removed = dispatch(&registry, &json!({ "action": "remove", "peer_id": "A" })).unwrap();
        assert_eq!(removed, json!({ "ok": true }));

        let listed = dispatch(&registry, &json!({ "action": "list" })).unwrap();
        assert!(listed["peers"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_register_without_peer_id_is_invalid() {
        let registry = test_registry();
        let err = dispatch(
            &registry,
            &json!({ "action": "register", "address": "10.0.0.5:1" }),
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRequest(_)));
        assert_eq!(registry.health().peer_count, 0);
    }

    #[test]
    fn test_unknown_action_unsupported() {
        let registry = test_registry();
        let err = dispatch(&registry, &json!({ "action": "teleport" })).unwrap_err();
        assert_eq!(err, RegistryError::UnsupportedAction("teleport".into()));
    }

    #[test]
    fn test_missing_action_is_invalid() {
        let registry = test_registry();
        let err = dispatch(&registry, &json!({ "peer_id": "A" })).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRequest(_)));
    }

    #[test]
    fn test_remove_absent_maps_to_not_found() {
        let registry = test_registry();
        let err = dispatch(&registry, &json!({ "action": "remove", "peer_id": "ghost" }))
            .unwrap_err();
        assert_eq!(err, RegistryError::NotFound);
        assert_eq!(error_status(&err), StatusCode::NOT_FOUND);
        assert_eq!(error_body(&err), json!({ "error": "not_found" }));
    }

    #[test]
    fn test_health_action_matches_endpoint_shape() {
        let registry = test_registry();
        registry.register_or_update("A", "10.0.0.5:1").unwrap();

        let health = dispatch(&registry, &json!({ "action": "health" })).unwrap();
        assert_eq!(health["peer_count"], 1);
        assert!(health["uptime_seconds"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_http_routes_end_to_end() {
        let registry = Arc::new(test_registry());
        let routes = routes(Arc::clone(&registry));

        let response = warp::test::request()
            .method("POST")
            .path("/api")
            .json(&json!({ "action": "register", "peer_id": "A", "address": "10.0.0.5:1" }))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = warp::test::request()
            .method("POST")
            .path("/api")
            .json(&json!({ "action": "warp_drive" }))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = warp::test::request()
            .method("POST")
            .path("/api")
            .json(&json!({ "action": "remove", "peer_id": "ghost" }))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["peer_count"], 1);

        let response = warp::test::request()
            .method("GET")
            .path("/")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let page = String::from_utf8_lossy(response.body()).to_string();
        assert!(page.contains("Active peers: 1"));
    }
}
