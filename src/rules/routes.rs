//! REST endpoints for rule management.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::model::Rule;
use super::store::{CreateOutcome, RuleStore};
use crate::error::RuleError;

/// Shared state for rule routes.
#[derive(Clone)]
pub struct RuleRouteState {
    pub store: RuleStore,
}

/// Body of `POST /rules`.
#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Response for create and update.
#[derive(Debug, Serialize, Deserialize)]
pub struct RuleResponse {
    pub message: String,
    pub rule_id: String,
    pub label: String,
    pub keywords: Vec<String>,
}

impl RuleResponse {
    fn new(message: &str, rule: Rule) -> Self {
        Self {
            message: message.to_string(),
            rule_id: rule.id,
            label: rule.label,
            keywords: rule.keywords,
        }
    }
}

/// Response for deletes.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error body, `{"detail": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
        .into_response()
}

/// POST /rules
///
/// Creates a rule, or merges keywords into the rule with the same label.
async fn create_rule(
    State(state): State<RuleRouteState>,
    body: Result<Json<CreateRuleRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection, "Malformed rule body");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    match state.store.create(&req.label, &req.keywords).await {
        Ok((rule, CreateOutcome::Created)) => {
            Json(RuleResponse::new("Rule created successfully", rule)).into_response()
        }
        Ok((rule, CreateOutcome::Merged)) => {
            Json(RuleResponse::new("Rule updated successfully", rule)).into_response()
        }
        Err(e) => {
            warn!(label = %req.label, error = %e, "Rule creation failed");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

/// PUT /rules/{rule_id}?keywords=a&keywords=b
///
/// Appends keywords to an existing rule; 404 if the label is unknown.
async fn update_rule(
    State(state): State<RuleRouteState>,
    Path(rule_id): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let keywords = keywords_from_query(query.as_deref().unwrap_or_default());
    match state.store.update(&rule_id, &keywords).await {
        Ok(rule) => Json(RuleResponse::new("Rule updated successfully", rule)).into_response(),
        Err(e) if e.is_not_found() => error_response(StatusCode::NOT_FOUND, "Rule not found"),
        Err(e) => {
            warn!(rule_id = %rule_id, error = %e, "Rule update failed");
            error_response(StatusCode::BAD_REQUEST, "Rule update failed")
        }
    }
}

/// DELETE /rules/{rule_id}
async fn delete_rule(
    State(state): State<RuleRouteState>,
    Path(rule_id): Path<String>,
) -> Response {
    match state.store.delete(&rule_id).await {
        Ok(_) => Json(MessageResponse {
            message: "Rule deleted successfully".into(),
        })
        .into_response(),
        Err(e) if e.is_not_found() => error_response(StatusCode::NOT_FOUND, "Rule not found"),
        Err(e) => {
            warn!(rule_id = %rule_id, error = %e, "Rule deletion failed");
            error_response(StatusCode::BAD_REQUEST, "Rule deletion failed")
        }
    }
}

/// DELETE /rules?keywd=...
///
/// Deletes the first rule containing the keyword.
async fn delete_rule_by_keyword(
    State(state): State<RuleRouteState>,
    RawQuery(query): RawQuery,
) -> Response {
    let keyword = query_param(query.as_deref().unwrap_or_default(), "keywd");
    let Some(keyword) = keyword.filter(|k| !k.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing keywd parameter");
    };

    match state.store.delete_by_keyword(&keyword).await {
        Ok(_) => Json(MessageResponse {
            message: format!("Rule with '{keyword}' keyword deleted successfully"),
        })
        .into_response(),
        Err(e @ RuleError::KeywordNotFound { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            warn!(keyword = %keyword, error = %e, "Rule deletion by keyword failed");
            error_response(
                StatusCode::BAD_REQUEST,
                "Rule deletion with keyword failed",
            )
        }
    }
}

/// GET /rules
async fn list_rules(State(state): State<RuleRouteState>) -> Response {
    match state.store.list().await {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mail-labeler-rules"
    }))
}

/// Collect every `keywords` (or legacy `updated_rule`) value from a query
/// string, in order.
pub fn keywords_from_query(query: &str) -> Vec<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == "keywords" || key == "updated_rule")
        .map(|(_, value)| value.into_owned())
        .collect()
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Build the rule REST routes.
pub fn rule_routes(store: RuleStore) -> Router {
    let state = RuleRouteState { store };

    Router::new()
        .route("/health", get(health))
        .route(
            "/rules",
            get(list_rules)
                .post(create_rule)
                .delete(delete_rule_by_keyword),
        )
        .route("/rules/{rule_id}", put(update_rule).delete(delete_rule))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
