use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::fanout;
use crate::queue::ledger::{self, QueuePosition};
use crate::queue::lifecycle::{self, CancelActor, ListGroup};
use crate::realtime::{EventScope, QueueEvent};
use crate::storage::models::{Token, TokenStatus};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct IssueTokenRequest {
    pub service_id: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CancelTokenRequest {
    #[serde(default)]
    pub reason: Option<String>,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub auto_cancelled: bool,
    pub called_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub estimated_wait_minutes: u32,
    pub id: String,
    pub queue_position: u32,
    pub service_id: String,
    pub service_started_at: Option<String>,
    pub status: TokenStatus,
    pub ticket_number: String,
    pub user_id: String,
}

pub(super) fn token_to_response(token: &Token) -> TokenResponse {
    TokenResponse {
        auto_cancelled: token.auto_cancelled,
        called_at: token.called_at.map(|t| t.to_rfc3339()),
        cancel_reason: token.cancel_reason.clone(),
        cancelled_at: token.cancelled_at.map(|t| t.to_rfc3339()),
        completed_at: token.completed_at.map(|t| t.to_rfc3339()),
        created_at: token.created_at.to_rfc3339(),
        estimated_wait_minutes: token.estimated_wait_minutes,
        id: token.id.clone(),
        queue_position: token.queue_position,
        service_id: token.service_id.clone(),
        service_started_at: token.service_started_at.map(|t| t.to_rfc3339()),
        status: token.status,
        ticket_number: token.ticket_number.clone(),
        user_id: token.user_id.clone(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<IssueTokenRequest>,
) -> Result<Json<JSend<TokenResponse>>, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }
    if req.service_id.trim().is_empty() {
        return Err(ApiError::bad_request("service_id is required"));
    }

    let token = lifecycle::issue(
        &state.db,
        state.clock.as_ref(),
        &state.config.queue,
        &req.user_id,
        &req.service_id,
    )?;

    tracing::debug!(id = %token.id, ticket = %token.ticket_number, "Issued token");

    fanout::token_changed(&state, &token);
    fanout::queue_changed(&state, &req.service_id);

    Ok(JSend::success(token_to_response(&token)))
}

pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<TokenResponse>>, ApiError> {
    if let Some(token) = state.cache.get_token(&id) {
        return Ok(JSend::success(token_to_response(&token)));
    }

    let token = state
        .db
        .get_token(&id)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("Token not found"))?;
    state.cache.put_token(&token);

    Ok(JSend::success(token_to_response(&token)))
}

pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListParams>,
) -> Result<Json<JSend<Vec<TokenResponse>>>, ApiError> {
    let group = match params.group.as_deref() {
        Some(raw) => raw
            .parse::<ListGroup>()
            .map_err(|_| ApiError::bad_request("group must be active, completed or terminal"))?,
        None => ListGroup::Active,
    };

    // Listings are cached per service; the unscoped listing goes straight
    // to the datastore.
    if let Some(service_id) = &params.service_id {
        if let Some(tokens) = state.cache.get_listing(service_id, group.as_str()) {
            return Ok(JSend::success(tokens.iter().map(token_to_response).collect()));
        }

        let tokens = lifecycle::list(&state.db, Some(service_id), group)?;
        state
            .cache
            .put_listing(service_id, group.as_str(), tokens.clone());
        return Ok(JSend::success(tokens.iter().map(token_to_response).collect()));
    }

    let tokens = lifecycle::list(&state.db, None, group)?;
    Ok(JSend::success(tokens.iter().map(token_to_response).collect()))
}

pub async fn get_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<QueuePosition>>, ApiError> {
    let position = ledger::position_of(&state.db, &id)?;
    Ok(JSend::success(position))
}

pub async fn cancel_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(req): AppJson<CancelTokenRequest>,
) -> Result<Json<JSend<TokenResponse>>, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    let token = lifecycle::cancel(
        &state.db,
        state.clock.as_ref(),
        state.abuse.as_ref(),
        &state.config.queue,
        &id,
        CancelActor::User(req.user_id),
        req.reason,
    )?;

    tracing::debug!(id = %token.id, "Cancelled token");

    state.cache.invalidate_token(&token.id);
    state.realtime.publish(
        EventScope::Token(token.id.clone()),
        QueueEvent::TokenCancelled {
            reason: token.cancel_reason.clone(),
            token_id: token.id.clone(),
        },
    );
    fanout::queue_changed(&state, &token.service_id);

    Ok(JSend::success(token_to_response(&token)))
}

pub async fn call_next(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<String>,
) -> Result<Json<JSend<TokenResponse>>, ApiError> {
    let token = lifecycle::call_next(&state.db, state.clock.as_ref(), &service_id)?;

    tracing::debug!(id = %token.id, ticket = %token.ticket_number, "Called token");

    state.realtime.publish(
        EventScope::Token(token.id.clone()),
        QueueEvent::YourTurn {
            ticket_number: token.ticket_number.clone(),
            token_id: token.id.clone(),
        },
    );
    state.notifier.notify(
        &token.user_id,
        "your_turn",
        "It's your turn",
        &format!("Ticket {} has been called.", token.ticket_number),
    );
    fanout::token_changed(&state, &token);
    fanout::queue_changed(&state, &service_id);

    Ok(JSend::success(token_to_response(&token)))
}

pub async fn serve_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<TokenResponse>>, ApiError> {
    let token = lifecycle::serve(&state.db, state.clock.as_ref(), &id)?;

    fanout::token_changed(&state, &token);

    Ok(JSend::success(token_to_response(&token)))
}

pub async fn complete_token(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<TokenResponse>>, ApiError> {
    let token = lifecycle::complete(&state.db, state.clock.as_ref(), &id)?;

    fanout::token_changed(&state, &token);
    fanout::queue_changed(&state, &token.service_id);

    Ok(JSend::success(token_to_response(&token)))
}
