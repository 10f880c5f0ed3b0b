//! HTTP handlers for the policy API.

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use policy_core::{Policy, PolicyId, PolicyRequest};
use serde::Serialize;

use crate::error::ServiceError;
use crate::server::AppState;
use crate::session;

/// Body returned by update and delete.
#[derive(Debug, Serialize)]
pub struct Confirmation {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub subscribers: usize,
}

fn parse_id(raw: &str) -> Result<PolicyId, ServiceError> {
    raw.parse()
        .map_err(|_| ServiceError::MalformedRequest(format!("Invalid ID format: {raw:?}")))
}

fn decode_body(
    body: Result<Json<PolicyRequest>, JsonRejection>,
) -> Result<PolicyRequest, ServiceError> {
    body.map(|Json(request)| request)
        .map_err(|rejection| ServiceError::MalformedRequest(rejection.body_text()))
}

pub async fn list_policies(
    State(state): State<AppState>,
) -> Result<Json<Vec<Policy>>, ServiceError> {
    Ok(Json(state.service.list_all()?))
}

pub async fn create_policy(
    State(state): State<AppState>,
    body: Result<Json<PolicyRequest>, JsonRejection>,
) -> Result<Json<Policy>, ServiceError> {
    let request = decode_body(body)?;
    Ok(Json(state.service.create(request)?))
}

pub async fn get_policy(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Policy>, ServiceError> {
    let id = parse_id(&raw_id)?;
    Ok(Json(state.service.get(id)?))
}

pub async fn update_policy(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<PolicyRequest>, JsonRejection>,
) -> Result<Json<Confirmation>, ServiceError> {
    let id = parse_id(&raw_id)?;
    let request = decode_body(body)?;
    state.service.update(id, request)?;
    Ok(Json(Confirmation {
        message: format!("Policy at id: {id} was updated successfully"),
    }))
}

pub async fn delete_policy(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Confirmation>, ServiceError> {
    let id = parse_id(&raw_id)?;
    state.service.delete(id)?;
    Ok(Json(Confirmation {
        message: format!("Deleted policy at id: {id}"),
    }))
}

/// WebSocket upgrade handler. Any origin may subscribe.
pub async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        session::run_session(socket, state.service, state.session).await;
    })
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        subscribers: state.service.registry().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_accepts_integers() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert_eq!(parse_id("-1").unwrap(), -1);
    }

    #[test]
    fn parse_id_rejects_garbage() {
        for raw in ["abc", "", "1.5", "99999999999999999999"] {
            let err = parse_id(raw).unwrap_err();
            assert!(matches!(err, ServiceError::MalformedRequest(_)), "{raw}: {err:?}");
        }
    }

    #[test]
    fn confirmation_serializes_message() {
        let body = serde_json::to_value(Confirmation {
            message: "Deleted policy at id: 3".into(),
        })
        .unwrap();
        assert_eq!(body["message"], "Deleted policy at id: 3");
    }
}
