use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::page::{LoadedPage, NewPage, Page, PageSection, PageUpdate};
use crate::state::AppState;
use crate::subpage::engine::AddedSection;
use crate::subpage::lifecycle::ModuleDeletionWarning;

/// Header carrying the acting user's id; deletion events are attributed to it.
pub const ACTOR_HEADER: &str = "x-user-id";

#[derive(Deserialize)]
pub struct AddSectionRequest {
    pub name: Option<String>,
    pub summary: Option<String>,
}

#[derive(Deserialize)]
pub struct MoveSectionRequest {
    pub target_order: i32,
}

#[derive(Deserialize)]
pub struct StealthRequest {
    pub stealth: bool,
}

#[derive(Serialize)]
pub struct DeletionResponse {
    pub warnings: Vec<ModuleDeletionWarning>,
}

#[derive(Serialize)]
pub struct SectionEmptyResponse {
    pub empty: bool,
}

#[derive(Serialize)]
pub struct SectionNumberResponse {
    pub section_number: i32,
}

fn actor(headers: &HeaderMap) -> i64 {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// POST /api/v1/pages
pub async fn handle_create_page(
    State(state): State<AppState>,
    Json(req): Json<NewPage>,
) -> Result<(StatusCode, Json<Page>), AppError> {
    let page = state.engine.create_page(req).await?;
    Ok((StatusCode::CREATED, Json(page)))
}

/// GET /api/v1/modules/:cm_id/page
pub async fn handle_load_page(
    State(state): State<AppState>,
    Path(cm_id): Path<i64>,
) -> Result<Json<LoadedPage>, AppError> {
    Ok(Json(state.engine.load_page(cm_id).await?))
}

/// PATCH /api/v1/pages/:page_id
pub async fn handle_update_page(
    State(state): State<AppState>,
    Path(page_id): Path<i64>,
    Json(req): Json<PageUpdate>,
) -> Result<Json<Page>, AppError> {
    Ok(Json(state.engine.update_page(page_id, req).await?))
}

/// DELETE /api/v1/pages/:page_id
pub async fn handle_delete_page(
    State(state): State<AppState>,
    Path(page_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<DeletionResponse>, AppError> {
    let warnings = state.engine.delete_page(page_id, actor(&headers)).await?;
    Ok(Json(DeletionResponse { warnings }))
}

/// GET /api/v1/pages/:page_id/sections
pub async fn handle_list_sections(
    State(state): State<AppState>,
    Path(page_id): Path<i64>,
) -> Result<Json<Vec<PageSection>>, AppError> {
    Ok(Json(state.engine.list_sections(page_id).await?))
}

/// POST /api/v1/pages/:page_id/sections
pub async fn handle_add_section(
    State(state): State<AppState>,
    Path(page_id): Path<i64>,
    Json(req): Json<AddSectionRequest>,
) -> Result<(StatusCode, Json<AddedSection>), AppError> {
    let added = state
        .engine
        .add_section(page_id, req.name.as_deref(), req.summary.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(added)))
}

/// PUT /api/v1/pages/:page_id/sections/:section_id/order
pub async fn handle_move_section(
    State(state): State<AppState>,
    Path((page_id, section_id)): Path<(i64, i64)>,
    Json(req): Json<MoveSectionRequest>,
) -> Result<StatusCode, AppError> {
    state
        .engine
        .move_section(page_id, section_id, req.target_order)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/pages/:page_id/sections/:section_id
pub async fn handle_delete_section(
    State(state): State<AppState>,
    Path((page_id, section_id)): Path<(i64, i64)>,
    headers: HeaderMap,
) -> Result<Json<DeletionResponse>, AppError> {
    let warnings = state
        .engine
        .delete_section(page_id, section_id, actor(&headers))
        .await?;
    Ok(Json(DeletionResponse { warnings }))
}

/// PUT /api/v1/sections/:section_id/stealth
pub async fn handle_set_stealth(
    State(state): State<AppState>,
    Path(section_id): Path<i64>,
    Json(req): Json<StealthRequest>,
) -> Result<StatusCode, AppError> {
    state.engine.set_stealth(section_id, req.stealth).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/courses/:course_id/sections/:section_id/empty
pub async fn handle_section_empty(
    State(state): State<AppState>,
    Path((course_id, section_id)): Path<(i64, i64)>,
) -> Result<Json<SectionEmptyResponse>, AppError> {
    let empty = state.engine.is_section_empty(course_id, section_id).await?;
    Ok(Json(SectionEmptyResponse { empty }))
}

/// GET /api/v1/courses/:course_id/next-section-number
pub async fn handle_next_section_number(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Json<SectionNumberResponse>, AppError> {
    let section_number = state.engine.allocate_section_number(course_id).await?;
    Ok(Json(SectionNumberResponse { section_number }))
}
