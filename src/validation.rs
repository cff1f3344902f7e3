use crate::error::{AppError, AppResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length, in characters, of project names and task titles.
pub const MAX_NAME_LENGTH: usize = 200;

/// Maximum length, in characters, of descriptions.
pub const MAX_DESCRIPTION_LENGTH: usize = 4000;

/// Lowest task priority.
pub const MIN_PRIORITY: u8 = 1;

/// Highest task priority.
pub const MAX_PRIORITY: u8 = 5;

/// Priority given to v2 tasks created without one.
pub const DEFAULT_PRIORITY: u8 = 3;

/// Maximum length, in bytes, of an `Idempotency-Key` header value.
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 255;

/// Validate a project name.
pub fn validate_project_name(name: &str) -> AppResult<()> {
    validate_label(name, "Project name")
}

/// Validate a task title.
pub fn validate_task_title(title: &str) -> AppResult<()> {
    validate_label(title, "Task title")
}

/// Shared rules for names and titles:
/// - Between 1 and 200 characters after trimming
/// - No control characters
fn validate_label(value: &str, field: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{field} cannot be empty")));
    }

    let length = value.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "{field} cannot exceed {MAX_NAME_LENGTH} characters (got {length})"
        )));
    }

    if let Some(pos) = value.chars().position(char::is_control) {
        return Err(AppError::BadRequest(format!(
            "{field} contains invalid control character at position {pos}"
        )));
    }

    Ok(())
}

/// Validate a free-form description. Empty is allowed; newlines and tabs too.
pub fn validate_description(description: &str) -> AppResult<()> {
    let length = description.chars().count();
    if length > MAX_DESCRIPTION_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Description cannot exceed {MAX_DESCRIPTION_LENGTH} characters (got {length})"
        )));
    }

    Ok(())
}

/// Validate a task priority.
pub fn validate_priority(priority: u8) -> AppResult<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(AppError::BadRequest(format!(
            "Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY} (got {priority})"
        )));
    }

    Ok(())
}

/// Validate a non-empty idempotency key.
///
/// Rules:
/// - At most 255 bytes
/// - Visible ASCII only (`!` through `~`), so no spaces or control bytes
pub fn validate_idempotency_key(key: &str) -> AppResult<()> {
    if key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Idempotency-Key cannot exceed {MAX_IDEMPOTENCY_KEY_LENGTH} bytes"
        )));
    }

    if let Some(pos) = key.bytes().position(|b| !b.is_ascii_graphic()) {
        return Err(AppError::BadRequest(format!(
            "Idempotency-Key contains invalid character at position {pos}"
        )));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_project_name("Website relaunch").is_ok());
        assert!(validate_project_name("a").is_ok());
        assert!(validate_task_title("Fix login bug #42").is_ok());
        assert!(validate_task_title("Übersetzung prüfen").is_ok());
    }

    #[test]
    fn test_empty_name() {
        let result = validate_project_name("");
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));

        assert!(validate_task_title("   ").is_err());
    }

    #[test]
    fn test_name_length_counts_characters() {
        assert!(validate_project_name(&"a".repeat(200)).is_ok());
        assert!(validate_project_name(&"é".repeat(200)).is_ok());

        let result = validate_project_name(&"a".repeat(201));
        assert!(result.unwrap_err().to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_name_with_control_character() {
        let result = validate_task_title("line\nbreak");
        assert!(result.unwrap_err().to_string().contains("position 4"));
    }

    #[test]
    fn test_description() {
        assert!(validate_description("").is_ok());
        assert!(validate_description("multi\nline\tdescription").is_ok());
        assert!(validate_description(&"d".repeat(4000)).is_ok());
        assert!(validate_description(&"d".repeat(4001)).is_err());
    }

    #[test]
    fn test_priority_bounds() {
        assert!(validate_priority(0).is_err());
        assert!(validate_priority(MIN_PRIORITY).is_ok());
        assert!(validate_priority(DEFAULT_PRIORITY).is_ok());
        assert!(validate_priority(MAX_PRIORITY).is_ok());
        assert!(validate_priority(6).is_err());
    }

    #[test]
    fn test_idempotency_key() {
        assert!(validate_idempotency_key("order-42").is_ok());
        assert!(validate_idempotency_key("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_idempotency_key(&"k".repeat(255)).is_ok());
        assert!(validate_idempotency_key(&"k".repeat(256)).is_err());
        assert!(validate_idempotency_key("has space").is_err());
        assert!(validate_idempotency_key("tab\tkey").is_err());
    }
}
