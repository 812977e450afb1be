use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    gemini::GenerationError,
    models::{
        Effect, Formulation, FormulationRequest, InquiryAction, InquiryDetails, ProductType, RequestError,
        SavedFormulation, SkinType, Texture,
    },
    render::render_markdown,
    service::FormulationService,
};

/// Shown to users for any generation failure; `kind` in the body carries the detail.
pub const GENERATION_FAILED_MESSAGE: &str =
    "処方の生成中にエラーが発生しました。入力内容を確認し、再度お試しください。";

#[derive(Clone)]
pub struct AppState {
    pub service: FormulationService,
    pub store: Arc<RwLock<HashMap<Uuid, SavedFormulation>>>,
    pub in_flight: InFlight,
}

impl AppState {
    pub fn new(service: FormulationService) -> Self {
        Self { service, store: Arc::default(), in_flight: InFlight::default() }
    }
}

/// Sessions that currently have a generation running.
#[derive(Clone, Default)]
pub struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    /// Claims `session`, or returns `None` if it already has a call running.
    pub fn try_acquire(&self, session: &str) -> Option<InFlightGuard> {
        let key = session.trim().to_lowercase();
        if !self.0.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard { sessions: self.0.clone(), key })
    }

    pub fn is_busy(&self, session: &str) -> bool {
        self.0.lock().contains(&session.trim().to_lowercase())
    }
}

/// Releases the session claim when dropped, whatever the outcome of the call.
pub struct InFlightGuard {
    sessions: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.sessions.lock().remove(&self.key);
    }
}

#[derive(Debug)]
pub enum ApiError {
    Invalid(RequestError),
    Busy,
    NotFound,
    Generation(GenerationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Invalid(e) => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": e.to_string(), "kind": "invalid_request" }))
            }
            ApiError::Busy => (
                StatusCode::CONFLICT,
                json!({ "error": "処方を生成中です。完了までお待ちください。", "kind": "in_flight" }),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": "not found", "kind": "not_found" })),
            ApiError::Generation(e) => {
                (StatusCode::BAD_GATEWAY, json!({ "error": GENERATION_FAILED_MESSAGE, "kind": e.kind() }))
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<RequestError> for ApiError {
    fn from(e: RequestError) -> Self {
        ApiError::Invalid(e)
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        ApiError::Generation(e)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/options", get(form_options))
        .route("/api/formulations", post(generate_formulation))
        .route("/api/formulations/saved", get(list_saved).post(save_formulation))
        .route("/api/formulations/saved/:id", get(get_saved).delete(delete_saved))
        .route("/api/formulations/saved/:id/sheet", get(export_sheet))
        .route("/api/inquiries/template", get(inquiry_template))
        .route("/api/inquiries", post(submit_inquiry))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

pub async fn form_options() -> Json<serde_json::Value> {
    Json(json!({
        "productTypes": ProductType::ALL,
        "skinTypes": SkinType::ALL,
        "effects": Effect::ALL,
        "textures": Texture::ALL,
        "inquiryActions": InquiryAction::ALL,
        "defaults": FormulationRequest::default(),
    }))
}

pub async fn generate_formulation(
    State(state): State<AppState>,
    Json(body): Json<FormulationRequest>,
) -> Result<Json<Formulation>, ApiError> {
    body.validate()?;
    let _guard = state.in_flight.try_acquire(&body.email).ok_or_else(|| {
        tracing::warn!("⏳ Generation already running for {}", body.email);
        ApiError::Busy
    })?;

    let formulation = state.service.generate(&body).await?;
    Ok(Json(formulation))
}

pub async fn save_formulation(
    State(state): State<AppState>,
    Json(body): Json<Formulation>,
) -> (StatusCode, Json<SavedFormulation>) {
    let saved = SavedFormulation::new(body);
    state.store.write().insert(saved.id, saved.clone());
    tracing::info!("💾 Saved formulation '{}' as {}", saved.output.product_name, saved.id);
    (StatusCode::CREATED, Json(saved))
}

pub async fn list_saved(State(state): State<AppState>) -> Json<Vec<SavedFormulation>> {
    let mut saved: Vec<_> = state.store.read().values().cloned().collect();
    saved.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(saved)
}

pub async fn get_saved(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    if let Some(s) = state.store.read().get(&id).cloned() { Json(s).into_response() } else { ApiError::NotFound.into_response() }
}

pub async fn delete_saved(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.write().remove(&id).ok_or(ApiError::NotFound)?;
    tracing::info!("🗑️ Deleted saved formulation {}", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn export_sheet(Path(id): Path<Uuid>, State(state): State<AppState>) -> Response {
    let store = state.store.read();
    if let Some(saved) = store.get(&id) {
        let sheet = render_markdown(&saved.output);
        let headers = [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"formulation_{}.md\"", id)),
        ];
        return (StatusCode::OK, headers, sheet).into_response();
    }
    ApiError::NotFound.into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateQuery {
    pub action: InquiryAction,
    #[serde(default)]
    pub product_name: String,
}

#[derive(Debug, Serialize)]
pub struct InquiryTemplate {
    pub title: &'static str,
    pub message: String,
}

pub async fn inquiry_template(Query(query): Query<TemplateQuery>) -> Json<InquiryTemplate> {
    Json(InquiryTemplate {
        title: query.action.title(),
        message: InquiryDetails::default_message(query.action, &query.product_name),
    })
}

#[derive(Debug, Deserialize)]
pub struct InquirySubmission {
    pub action: InquiryAction,
    pub details: InquiryDetails,
}

/// Accepts an inquiry. Nothing is sent anywhere yet; the submission is only logged.
pub async fn submit_inquiry(Json(body): Json<InquirySubmission>) -> Result<impl IntoResponse, ApiError> {
    body.details.validate()?;
    let InquiryDetails { company_name, contact_name, email, message } = &body.details;
    tracing::info!(
        action = %body.action,
        company = %company_name,
        contact = %contact_name,
        email = %email,
        "📨 Inquiry received: {}",
        message
    );
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "received", "action": body.action }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_is_released_on_drop() {
        let in_flight = InFlight::default();
        let guard = in_flight.try_acquire("Buyer@Example.jp").expect("first claim");
        assert!(in_flight.is_busy("buyer@example.jp "));
        assert!(in_flight.try_acquire("buyer@example.jp").is_none());
        assert!(in_flight.try_acquire("other@example.jp").is_some());
        drop(guard);
        assert!(!in_flight.is_busy("buyer@example.jp"));
        assert!(in_flight.try_acquire("buyer@example.jp").is_some());
    }
}
