//! Shared utilities for handlers.

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::idempotency::IdempotencyCache;
use crate::metrics;
use crate::store::{Collection, Resource};

/// JSON body extractor whose rejections are [`AppError`]s.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

impl<T: Serialize> IntoResponse for AppJson<T> {
    fn into_response(self) -> Response {
        Json(self.0).into_response()
    }
}

/// Path extractor whose rejections are [`AppError`]s.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

/// Query extractor whose rejections are [`AppError`]s.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

/// Run a creation at most once per idempotency key.
///
/// Without a key, `create` always runs. With a key, the key is reserved for
/// the whole call: a recorded resource is returned as-is, otherwise `create`
/// runs and its result is recorded. `create` is expected to validate its
/// input and insert the new resource into `collection`.
///
/// A recorded id that is not in `collection` means the key was spent on
/// another collection or the resource was deleted; that is a 409.
pub async fn create_once<T, F, Fut>(
    idempotency: &IdempotencyCache,
    collection: &Collection<T>,
    key: Option<String>,
    kind: &'static str,
    create: F,
) -> AppResult<(StatusCode, AppJson<T>)>
where
    T: Resource + Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let Some(key) = key else {
        let created = create().await?;
        return Ok((StatusCode::CREATED, AppJson(created)));
    };

    let reservation = idempotency.reserve(&key).await;

    if let Some(existing) = reservation.existing() {
        return match collection.get(existing).await {
            Some(resource) => {
                debug!(key = %key, id = %existing, kind, "Idempotent replay");
                metrics::record_idempotent_replay(kind);
                Ok((StatusCode::CREATED, AppJson(resource)))
            }
            None => Err(spent_key(&key, existing, kind)),
        };
    }

    let created = create().await?;
    reservation.record(created.id());
    Ok((StatusCode::CREATED, AppJson(created)))
}

fn spent_key(key: &str, existing: Uuid, kind: &str) -> AppError {
    debug!(key, id = %existing, kind, "Idempotency key refers to a missing resource");
    AppError::Conflict(format!(
        "Idempotency-Key was already used for a resource that is not an existing {kind}"
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Project;

    fn project(name: &str) -> Project {
        Project::new(name.to_string(), String::new())
    }

    #[tokio::test]
    async fn test_without_key_always_creates() {
        let cache = IdempotencyCache::new();
        let projects = Collection::new();

        for _ in 0..2 {
            create_once(&cache, &projects, None, "project", || async {
                let created = project("same");
                projects.insert(created.clone()).await;
                Ok(created)
            })
            .await
            .unwrap();
        }

        assert_eq!(projects.len().await, 2);
    }

    #[tokio::test]
    async fn test_same_key_replays_first_resource() {
        let cache = IdempotencyCache::new();
        let projects = Collection::new();
        let key = Some("k-1".to_string());

        let (status, AppJson(first)) =
            create_once(&cache, &projects, key.clone(), "project", || async {
                let created = project("first");
                projects.insert(created.clone()).await;
                Ok(created)
            })
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let (status, AppJson(second)) = create_once(&cache, &projects, key, "project", || async {
            let created = project("second");
            projects.insert(created.clone()).await;
            Ok(created)
        })
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second, first);
        assert_eq!(projects.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_creation_does_not_spend_key() {
        let cache = IdempotencyCache::new();
        let projects: Collection<Project> = Collection::new();
        let key = Some("k-2".to_string());

        let result = create_once(&cache, &projects, key.clone(), "project", || async {
            Err(AppError::BadRequest("nope".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(cache.lookup("k-2").await, None);
    }

    #[tokio::test]
    async fn test_key_for_missing_resource_conflicts() {
        let cache = IdempotencyCache::new();
        let projects: Collection<Project> = Collection::new();
        cache.store("k-3", Uuid::new_v4()).await;

        let result = create_once(&cache, &projects, Some("k-3".to_string()), "project", || async {
            Ok(project("never"))
        })
        .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }
}
