use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// Request to create a project.
///
/// Unknown fields are ignored so an idempotent retry with extra fields still
/// replays the recorded resource.
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Request to replace a project's name and description.
///
/// An omitted description clears it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Request to create a task inside a project.
///
/// Unknown fields are ignored so an idempotent retry with extra fields still
/// replays the recorded resource.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Honoured by v2 only (default: 3); v1 ignores it
    #[serde(default)]
    pub priority: Option<u8>,
}

/// Partial task update; omitted fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    /// Honoured by v2 only
    pub priority: Option<u8>,
}

/// Query filters for the v2 task listing.
#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    pub priority: Option<u8>,
}

/// Confirmation returned by delete endpoints.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
    /// Seconds since the application state was created
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
