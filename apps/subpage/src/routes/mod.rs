pub mod health;

use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};

use crate::state::AppState;
use crate::subpage::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Pages
        .route("/api/v1/pages", post(handlers::handle_create_page))
        .route(
            "/api/v1/pages/:page_id",
            patch(handlers::handle_update_page).delete(handlers::handle_delete_page),
        )
        .route(
            "/api/v1/modules/:cm_id/page",
            get(handlers::handle_load_page),
        )
        // Page sections
        .route(
            "/api/v1/pages/:page_id/sections",
            get(handlers::handle_list_sections).post(handlers::handle_add_section),
        )
        .route(
            "/api/v1/pages/:page_id/sections/:section_id",
            delete(handlers::handle_delete_section),
        )
        .route(
            "/api/v1/pages/:page_id/sections/:section_id/order",
            put(handlers::handle_move_section),
        )
        .route(
            "/api/v1/sections/:section_id/stealth",
            put(handlers::handle_set_stealth),
        )
        // Course-level queries
        .route(
            "/api/v1/courses/:course_id/sections/:section_id/empty",
            get(handlers::handle_section_empty),
        )
        .route(
            "/api/v1/courses/:course_id/next-section-number",
            get(handlers::handle_next_section_number),
        )
        .with_state(state)
}
