//! HTTP routes: one handler per endpoint, grouped by aggregate.

use axum::{
    extract::{Extension, Path, Query, State},
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veritas_core::agent::AgentStatus;
use veritas_core::capability::Scope;
use veritas_core::event::{EventSubmission, EventType};
use veritas_core::reputation::OutcomeType;
use veritas_persist::{agents, capabilities, events, reputation};

use crate::auth::AuthenticatedAgent;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{agent_signature_middleware, service_key_middleware};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

// ---------------------------------------------------------------- agents

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub public_key: String,
    pub name: Option<String>,
    pub owner: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

async fn register_agent(
    State(state): State<AppState>,
    Json(body): Json<RegisterAgentRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<veritas_core::Agent>)> {
    let agent = agents::register(
        &state.pool,
        &body.public_key,
        body.name.as_deref(),
        body.owner.as_deref(),
        body.metadata.unwrap_or(serde_json::json!({})),
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, Json(agent)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentsQuery {
    pub status: Option<AgentStatus>,
    pub owner: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

async fn list_agents(
    State(state): State<AppState>,
    Query(q): Query<ListAgentsQuery>,
) -> ApiResult<Json<Vec<veritas_core::Agent>>> {
    let agents = agents::list(&state.pool, q.status, q.owner.as_deref(), q.limit, q.offset).await?;
    Ok(Json(agents))
}

async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<veritas_core::Agent>> {
    let agent = agents::get_by_id(&state.pool, &agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("agent {agent_id}")))?;
    Ok(Json(agent))
}

#[derive(Debug, Deserialize, Default)]
pub struct RevokeAgentRequest {
    pub reason: Option<String>,
}

async fn revoke_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    body: Option<Json<RevokeAgentRequest>>,
) -> ApiResult<Json<veritas_core::Agent>> {
    let reason = body.and_then(|Json(b)| b.reason);
    let agent = agents::revoke(&state.pool, &agent_id, reason.as_deref()).await?;
    Ok(Json(agent))
}

// ---------------------------------------------------------------- events

async fn append_event(
    State(state): State<AppState>,
    Extension(authenticated): Extension<AuthenticatedAgent>,
    Json(submission): Json<EventSubmission>,
) -> ApiResult<(axum::http::StatusCode, Json<veritas_core::Event>)> {
    if submission.agent_id != authenticated.agent_id {
        return Err(ApiError::Unauthorized(
            "signed request agent does not match event agent_id".to_string(),
        ));
    }

    let agent = agents::get_by_id(&state.pool, &submission.agent_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized(format!("unknown agent {}", submission.agent_id)))?;

    let event = events::admit(&state.pool, &submission, &agent.public_key, Utc::now()).await?;
    Ok((axum::http::StatusCode::CREATED, Json(event)))
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEventsQuery {
    pub agent_id: Option<String>,
    pub event_type: Option<EventType>,
    pub correlation_id: Option<uuid::Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

async fn query_events(
    State(state): State<AppState>,
    Query(q): Query<QueryEventsQuery>,
) -> ApiResult<Json<Vec<veritas_core::Event>>> {
    let filter = events::EventFilter {
        agent_id: q.agent_id,
        event_type: q.event_type,
        correlation_id: q.correlation_id,
        since: q.since,
        until: q.until,
    };
    let found = events::query(&state.pool, &filter, q.limit, q.offset).await?;
    Ok(Json(found))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<veritas_core::Event>> {
    let event = events::get_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("event {id}")))?;
    Ok(Json(event))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastHashResponse {
    pub agent_id: String,
    pub last_hash: Option<String>,
}

async fn last_hash(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<LastHashResponse>> {
    let chain = events::load_chain(&state.pool, &agent_id).await?;
    let last_hash = chain.last().map(|e| e.hash.clone());
    Ok(Json(LastHashResponse { agent_id, last_hash }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyChainRequest {
    pub agent_id: String,
}

async fn verify_chain(
    State(state): State<AppState>,
    Json(body): Json<VerifyChainRequest>,
) -> ApiResult<Json<veritas_core::event::ChainVerification>> {
    let agent = agents::get_by_id(&state.pool, &body.agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("agent {}", body.agent_id)))?;
    let chain = events::load_chain(&state.pool, &body.agent_id).await?;
    let result = veritas_core::event::verify_chain(&chain, &agent.public_key);
    Ok(Json(result))
}

// ---------------------------------------------------------- capabilities

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintCapabilityRequest {
    pub agent_id: String,
    pub scope: Scope,
    pub issued_by: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintCapabilityResponse {
    pub capability: veritas_core::Capability,
    pub token: String,
}

async fn mint_capability(
    State(state): State<AppState>,
    Json(body): Json<MintCapabilityRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<MintCapabilityResponse>)> {
    let (capability, token) = capabilities::mint(
        &state.pool,
        &body.agent_id,
        &body.scope,
        &body.issued_by,
        body.expires_at,
    )
    .await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(MintCapabilityResponse { capability, token }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ValidateCapabilityRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCapabilityResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<veritas_core::Capability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

async fn validate_capability(
    State(state): State<AppState>,
    Json(body): Json<ValidateCapabilityRequest>,
) -> ApiResult<Json<ValidateCapabilityResponse>> {
    let result = capabilities::validate(&state.pool, &body.token).await?;
    let response = match result {
        capabilities::Validation::Valid(cap) => ValidateCapabilityResponse {
            valid: true,
            capability: Some(cap),
            reason: None,
        },
        capabilities::Validation::Invalid(reason) => ValidateCapabilityResponse {
            valid: false,
            capability: None,
            reason: Some(reason.to_string()),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPermissionRequest {
    pub agent_id: String,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct CheckPermissionResponse {
    pub allowed: bool,
}

async fn check_permission(
    State(state): State<AppState>,
    Json(body): Json<CheckPermissionRequest>,
) -> ApiResult<Json<CheckPermissionResponse>> {
    let (namespace, verb) = body
        .action
        .split_once(':')
        .ok_or_else(|| ApiError::Validation(format!("action {} is not namespace:verb", body.action)))?;
    let allowed = capabilities::check_permission(&state.pool, &body.agent_id, namespace, verb).await?;
    Ok(Json(CheckPermissionResponse { allowed }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCapabilitiesQuery {
    pub agent_id: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

async fn list_capabilities(
    State(state): State<AppState>,
    Query(q): Query<ListCapabilitiesQuery>,
) -> ApiResult<Json<Vec<veritas_core::Capability>>> {
    let found = capabilities::list(&state.pool, q.agent_id.as_deref(), q.active_only).await?;
    Ok(Json(found))
}

async fn revoke_capability(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<veritas_core::Capability>> {
    let cap = capabilities::revoke(&state.pool, id).await?;
    Ok(Json(cap))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepCapabilitiesResponse {
    pub expired: u64,
}

/// Admin-triggered run of the expire sweep, for operators who don't want to
/// wait for the background interval.
async fn sweep_capabilities(State(state): State<AppState>) -> ApiResult<Json<SweepCapabilitiesResponse>> {
    let expired = capabilities::sweep(&state.pool).await?;
    Ok(Json(SweepCapabilitiesResponse { expired }))
}

// ----------------------------------------------------------- reputation

async fn get_reputation(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<veritas_core::Reputation>> {
    let rep = reputation::get(&state.pool, &agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("reputation for agent {agent_id}")))?;
    Ok(Json(rep))
}

#[derive(Debug, Deserialize)]
pub struct ListReputationQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

async fn list_reputation(
    State(state): State<AppState>,
    Query(q): Query<ListReputationQuery>,
) -> ApiResult<Json<Vec<veritas_core::Reputation>>> {
    let found = reputation::list(&state.pool, q.limit, q.offset).await?;
    Ok(Json(found))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcomeRequest {
    pub agent_id: String,
    pub event_id: i64,
    pub outcome_type: OutcomeType,
    pub reporter: String,
    pub impact: Option<f64>,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcomeResponse {
    pub outcome: veritas_core::Outcome,
    pub reputation: veritas_core::Reputation,
}

async fn record_outcome(
    State(state): State<AppState>,
    Json(body): Json<RecordOutcomeRequest>,
) -> ApiResult<(axum::http::StatusCode, Json<RecordOutcomeResponse>)> {
    let (outcome, reputation) = reputation::record_outcome(
        &state.pool,
        &body.agent_id,
        body.event_id,
        body.outcome_type,
        &body.reporter,
        body.impact,
        body.details,
    )
    .await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(RecordOutcomeResponse { outcome, reputation }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdateDomainScoreRequest {
    pub domain: String,
    pub score: f64,
}

async fn update_domain_score(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<UpdateDomainScoreRequest>,
) -> ApiResult<Json<veritas_core::Reputation>> {
    let rep = reputation::update_domain_score(&state.pool, &agent_id, &body.domain, body.score).await?;
    Ok(Json(rep))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShouldDowngradeResponse {
    pub should_downgrade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

async fn should_downgrade(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<ShouldDowngradeResponse>> {
    let reason = reputation::should_downgrade(&state.pool, &agent_id).await?;
    Ok(Json(ShouldDowngradeResponse {
        should_downgrade: reason.is_some(),
        reason,
    }))
}

// -------------------------------------------------------------- router

/// Mutations gated on the shared service key.
fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/agents", post(register_agent))
        .route("/agents/{id}/revoke", post(revoke_agent))
        .route("/capabilities", post(mint_capability))
        .route("/capabilities/{id}/revoke", post(revoke_capability))
        .route("/capabilities/sweep-expired", post(sweep_capabilities))
        .route("/outcomes", post(record_outcome))
        .route("/reputation/{agentId}/domain", post(update_domain_score))
        .layer(middleware::from_fn_with_state(state, service_key_middleware))
}

/// Event appends, gated on a per-request agent signature.
fn agent_signed_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/events", post(append_event))
        .layer(middleware::from_fn_with_state(state, agent_signature_middleware))
}

/// Side-effect-free reads and validations. Events and capabilities are
/// public by construction (no payload confidentiality is claimed), so
/// reads carry no credential requirement beyond what the reverse proxy
/// or network boundary enforces.
fn public_router() -> Router<AppState> {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/{id}", get(get_agent))
        .route("/events", get(query_events))
        .route("/events/{id}", get(get_event))
        .route("/events/last-hash/{agentId}", get(last_hash))
        .route("/events/verify-chain", post(verify_chain))
        .route("/capabilities/validate", post(validate_capability))
        .route("/capabilities/check-permission", post(check_permission))
        .route("/capabilities", get(list_capabilities))
        .route("/reputation/{agentId}", get(get_reputation))
        .route("/reputation", get(list_reputation))
        .route("/reputation/{agentId}/should-downgrade", get(should_downgrade))
        .route("/health", get(health))
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api",
            public_router()
                .merge(admin_router(state.clone()))
                .merge(agent_signed_router(state.clone())),
        )
        .with_state(state)
}
