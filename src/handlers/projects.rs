//! Project endpoints. Both API versions share these handlers.

use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::util::{AppJson, AppPath, create_once};
use crate::error::{AppError, AppResult};
use crate::idempotency::IdempotencyKey;
use crate::middleware::AuthenticatedUser;
use crate::models::{CreateProjectRequest, DeleteResponse, Project, UpdateProjectRequest};
use crate::state::AppState;
use crate::validation::{validate_description, validate_project_name};

/// List all projects, oldest first.
#[instrument(skip(state))]
pub async fn list_projects(State(state): State<AppState>) -> AppJson<Vec<Project>> {
    AppJson(state.projects.list_where(|_| true).await)
}

/// Create a project.
///
/// Replays the original project when the `Idempotency-Key` was seen before.
#[instrument(skip(user, state, payload), fields(principal = %user.0))]
pub async fn create_project(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    IdempotencyKey(key): IdempotencyKey,
    AppJson(payload): AppJson<CreateProjectRequest>,
) -> AppResult<(StatusCode, AppJson<Project>)> {
    create_once(
        &state.idempotency,
        &state.projects,
        key,
        "project",
        || async {
            validate_project_name(&payload.name)?;
            validate_description(&payload.description)?;

            let project = Project::new(payload.name, payload.description);
            state.projects.insert(project.clone()).await;
            info!(id = %project.id, "Project created");
            Ok::<_, AppError>(project)
        },
    )
    .await
}

/// Get a project by id.
#[instrument(skip(state))]
pub async fn get_project(
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
) -> AppResult<AppJson<Project>> {
    state
        .projects
        .get(project_id)
        .await
        .map(AppJson)
        .ok_or_else(|| project_not_found(project_id))
}

/// Replace a project's name and description.
#[instrument(skip(user, state, payload), fields(principal = %user.0))]
pub async fn update_project(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateProjectRequest>,
) -> AppResult<AppJson<Project>> {
    validate_project_name(&payload.name)?;
    validate_description(&payload.description)?;

    state
        .projects
        .update(project_id, |project| {
            project.name = payload.name;
            project.description = payload.description;
            project.updated_at = Utc::now();
        })
        .await
        .map(AppJson)
        .ok_or_else(|| project_not_found(project_id))
}

/// Delete a project.
///
/// Tasks of the project are left in place.
#[instrument(skip(user, state), fields(principal = %user.0))]
pub async fn delete_project(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
) -> AppResult<AppJson<DeleteResponse>> {
    state
        .projects
        .remove(project_id)
        .await
        .ok_or_else(|| project_not_found(project_id))?;

    info!(id = %project_id, "Project deleted");
    Ok(AppJson(DeleteResponse {
        message: "project deleted".to_string(),
    }))
}

pub(super) fn project_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Project '{id}' not found"))
}
