use crate::subsystems::coordinator::CoordinatorError;
use crate::subsystems::registry::CoordinatorRegistry;
use countdown_core::ipc::{CountdownRequest, CountdownResponse};
use countdown_core::models::{GroupBootstrap, NewSession, SessionPatch};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Route one request to the coordinator owning its group.
pub async fn handle_request(
    request: CountdownRequest,
    registry: &CoordinatorRegistry,
) -> CountdownResponse {
    let group_id = request.group_id().map(str::to_string);
    match dispatch(request, registry).await {
        Ok(response) => response,
        Err(e) => {
            if matches!(
                e,
                CoordinatorError::Persistence(_)
                    | CoordinatorError::Unavailable(_)
                    | CoordinatorError::Stopped(_)
            ) {
                tracing::error!(group_id = ?group_id, code = e.code(), "Request failed: {}", e);
            } else {
                tracing::debug!(group_id = ?group_id, code = e.code(), "Request rejected: {}", e);
            }
            CountdownResponse::err(e.code(), e.to_string())
        }
    }
}

async fn dispatch(
    request: CountdownRequest,
    registry: &CoordinatorRegistry,
) -> Result<CountdownResponse, CoordinatorError> {
    match request {
        CountdownRequest::Ping => Ok(CountdownResponse::pong()),
        CountdownRequest::GetGroup { group_id } => {
            let state = registry
                .call(&group_id, |h| async move { h.get_group().await })
                .await?;
            Ok(CountdownResponse::ok(to_data(&state)))
        }
        CountdownRequest::Bootstrap { group_id, payload } => {
            let bootstrap: GroupBootstrap = decode(payload)?;
            let state = registry
                .call(&group_id, |h| {
                    let bootstrap = bootstrap.clone();
                    async move { h.bootstrap(bootstrap).await }
                })
                .await?;
            Ok(CountdownResponse::created(to_data(&state)))
        }
        CountdownRequest::ListSessions { group_id } => {
            let sessions = registry
                .call(&group_id, |h| async move { h.list_sessions().await })
                .await?;
            Ok(CountdownResponse::ok(to_data(&sessions)))
        }
        CountdownRequest::GetSession {
            group_id,
            session_id,
        } => {
            let session = registry
                .call(&group_id, |h| async move { h.get_session(session_id).await })
                .await?;
            Ok(CountdownResponse::ok(to_data(&session)))
        }
        CountdownRequest::CreateSession { group_id, payload } => {
            let new_session: NewSession = decode(payload)?;
            let write = registry
                .call(&group_id, |h| {
                    let new_session = new_session.clone();
                    async move { h.create_session(new_session).await }
                })
                .await?;
            Ok(CountdownResponse::created(to_data(&write)))
        }
        CountdownRequest::UpdateSession {
            group_id,
            session_id,
            payload,
        } => {
            let patch: SessionPatch = decode(payload)?;
            let write = registry
                .call(&group_id, |h| {
                    let patch = patch.clone();
                    async move { h.update_session(session_id, patch).await }
                })
                .await?;
            Ok(CountdownResponse::ok(to_data(&write)))
        }
        CountdownRequest::DeleteSession {
            group_id,
            session_id,
        } => {
            let deleted = registry
                .call(&group_id, |h| async move { h.delete_session(session_id).await })
                .await?;
            Ok(CountdownResponse::ok(serde_json::json!({ "deleted": deleted })))
        }
    }
}

/// A null body decodes as an empty payload, so required-field checks report
/// what is missing instead of a type error.
fn decode<T: DeserializeOwned + Default>(
    payload: serde_json::Value,
) -> Result<T, CoordinatorError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload)
        .map_err(|e| CoordinatorError::Validation(format!("Invalid payload: {}", e)))
}

fn to_data<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|_| serde_json::json!({}))
}
