//! Task endpoints.
//!
//! v1 and v2 share reads and deletes. v2 adds priority on create and update
//! and filters on listing; v1 never touches priority.

use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::projects::project_not_found;
use super::util::{AppJson, AppPath, AppQuery, create_once};
use crate::error::{AppError, AppResult};
use crate::idempotency::IdempotencyKey;
use crate::middleware::AuthenticatedUser;
use crate::models::{
    CreateTaskRequest, DeleteResponse, Task, TaskListQuery, UpdateTaskRequest,
};
use crate::state::AppState;
use crate::validation::{
    DEFAULT_PRIORITY, validate_description, validate_priority, validate_task_title,
};

/// API version a task request arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiVersion {
    V1,
    V2,
}

// =============================================================================
// Listing
// =============================================================================

/// List the tasks of a project, oldest first.
#[instrument(skip(state))]
pub async fn list_tasks_v1(
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
) -> AppJson<Vec<Task>> {
    AppJson(
        state
            .tasks
            .list_where(|task| task.project_id == project_id)
            .await,
    )
}

/// List the tasks of a project, optionally filtered by status and priority.
#[instrument(skip(state))]
pub async fn list_tasks_v2(
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
    AppQuery(filter): AppQuery<TaskListQuery>,
) -> AppJson<Vec<Task>> {
    AppJson(
        state
            .tasks
            .list_where(|task| {
                task.project_id == project_id
                    && filter.status.is_none_or(|status| task.status == status)
                    && filter
                        .priority
                        .is_none_or(|priority| task.priority == Some(priority))
            })
            .await,
    )
}

// =============================================================================
// Creation
// =============================================================================

/// Create a task in a project, ignoring any priority.
#[instrument(skip(user, state, payload), fields(principal = %user.0))]
pub async fn create_task_v1(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
    AppJson(payload): AppJson<CreateTaskRequest>,
) -> AppResult<(StatusCode, AppJson<Task>)> {
    create_task(state, project_id, key, payload, ApiVersion::V1).await
}

/// Create a task in a project with a priority (default 3).
#[instrument(skip(user, state, payload), fields(principal = %user.0))]
pub async fn create_task_v2(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    AppPath(project_id): AppPath<Uuid>,
    IdempotencyKey(key): IdempotencyKey,
    AppJson(payload): AppJson<CreateTaskRequest>,
) -> AppResult<(StatusCode, AppJson<Task>)> {
    create_task(state, project_id, key, payload, ApiVersion::V2).await
}

async fn create_task(
    state: AppState,
    project_id: Uuid,
    key: Option<String>,
    payload: CreateTaskRequest,
    version: ApiVersion,
) -> AppResult<(StatusCode, AppJson<Task>)> {
    create_once(&state.idempotency, &state.tasks, key, "task", || async {
        validate_task_title(&payload.title)?;
        validate_description(&payload.description)?;
        let priority = match version {
            ApiVersion::V1 => None,
            ApiVersion::V2 => {
                let priority = payload.priority.unwrap_or(DEFAULT_PRIORITY);
                validate_priority(priority)?;
                Some(priority)
            }
        };

        // Checked and released before the task collection is written
        if state.projects.get(project_id).await.is_none() {
            return Err(project_not_found(project_id));
        }

        let task = Task::new(project_id, payload.title, payload.description, priority);
        state.tasks.insert(task.clone()).await;
        info!(id = %task.id, project_id = %project_id, "Task created");
        Ok::<_, AppError>(task)
    })
    .await
}

// =============================================================================
// Single task
// =============================================================================

/// Get a task by id.
#[instrument(skip(state))]
pub async fn get_task(
    State(state): State<AppState>,
    AppPath(task_id): AppPath<Uuid>,
) -> AppResult<AppJson<Task>> {
    state
        .tasks
        .get(task_id)
        .await
        .map(AppJson)
        .ok_or_else(|| task_not_found(task_id))
}

/// Partially update a task; `priority` is ignored.
#[instrument(skip(user, state, payload), fields(principal = %user.0))]
pub async fn update_task_v1(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    AppPath(task_id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateTaskRequest>,
) -> AppResult<AppJson<Task>> {
    update_task(state, task_id, payload, ApiVersion::V1).await
}

/// Partially update a task, including its priority.
#[instrument(skip(user, state, payload), fields(principal = %user.0))]
pub async fn update_task_v2(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    AppPath(task_id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateTaskRequest>,
) -> AppResult<AppJson<Task>> {
    update_task(state, task_id, payload, ApiVersion::V2).await
}

async fn update_task(
    state: AppState,
    task_id: Uuid,
    payload: UpdateTaskRequest,
    version: ApiVersion,
) -> AppResult<AppJson<Task>> {
    if let Some(title) = &payload.title {
        validate_task_title(title)?;
    }
    if let Some(description) = &payload.description {
        validate_description(description)?;
    }
    let priority = match version {
        ApiVersion::V1 => None,
        ApiVersion::V2 => payload.priority,
    };
    if let Some(priority) = priority {
        validate_priority(priority)?;
    }

    state
        .tasks
        .update(task_id, |task| {
            if let Some(title) = payload.title {
                task.title = title;
            }
            if let Some(description) = payload.description {
                task.description = description;
            }
            if let Some(status) = payload.status {
                task.status = status;
            }
            if priority.is_some() {
                task.priority = priority;
            }
            task.updated_at = Utc::now();
        })
        .await
        .map(AppJson)
        .ok_or_else(|| task_not_found(task_id))
}

/// Delete a task.
#[instrument(skip(user, state), fields(principal = %user.0))]
pub async fn delete_task(
    user: AuthenticatedUser,
    State(state): State<AppState>,
    AppPath(task_id): AppPath<Uuid>,
) -> AppResult<AppJson<DeleteResponse>> {
    state
        .tasks
        .remove(task_id)
        .await
        .ok_or_else(|| task_not_found(task_id))?;

    info!(id = %task_id, "Task deleted");
    Ok(AppJson(DeleteResponse {
        message: "task deleted".to_string(),
    }))
}

fn task_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Task '{id}' not found"))
}
