//! Request payload validation.

use serde_json::Value;

use crate::tasks::TaskPriority;
use crate::utils::error::{DirectorError, DirectorResult};

const MAX_TITLE_LENGTH: usize = 200;
const MAX_DESCRIPTION_LENGTH: usize = 10_000;

/// Validates inbound JSON payloads before they are admitted.
pub struct InputValidator;

impl InputValidator {
    /// Validate a task submission body: `type` is required, everything else
    /// is optional but bounded.
    pub fn validate_task_payload(payload: &Value) -> DirectorResult<()> {
        let object = payload
            .as_object()
            .ok_or_else(|| DirectorError::ValidationError {
                field: "body".to_string(),
                reason: "expected a JSON object".to_string(),
            })?;

        match object.get("type") {
            Some(Value::String(kind)) if !kind.trim().is_empty() => {}
            Some(Value::String(_)) => {
                return Err(DirectorError::ValidationError {
                    field: "type".to_string(),
                    reason: "must not be empty".to_string(),
                })
            }
            Some(_) => {
                return Err(DirectorError::ValidationError {
                    field: "type".to_string(),
                    reason: "must be a string".to_string(),
                })
            }
            None => {
                return Err(DirectorError::ValidationError {
                    field: "type".to_string(),
                    reason: "is required".to_string(),
                })
            }
        }

        if let Some(title) = object.get("title") {
            match title.as_str() {
                Some(title) if title.len() <= MAX_TITLE_LENGTH => {}
                Some(_) => {
                    return Err(DirectorError::ValidationError {
                        field: "title".to_string(),
                        reason: format!("longer than {MAX_TITLE_LENGTH} characters"),
                    })
                }
                None => {
                    return Err(DirectorError::ValidationError {
                        field: "title".to_string(),
                        reason: "must be a string".to_string(),
                    })
                }
            }
        }

        if let Some(description) = object.get("description") {
            match description.as_str() {
                Some(description) if description.len() <= MAX_DESCRIPTION_LENGTH => {}
                Some(_) => {
                    return Err(DirectorError::ValidationError {
                        field: "description".to_string(),
                        reason: format!("longer than {MAX_DESCRIPTION_LENGTH} characters"),
                    })
                }
                None => {
                    return Err(DirectorError::ValidationError {
                        field: "description".to_string(),
                        reason: "must be a string".to_string(),
                    })
                }
            }
        }

        if let Some(priority) = object.get("priority") {
            let value = priority
                .as_str()
                .ok_or_else(|| DirectorError::ValidationError {
                    field: "priority".to_string(),
                    reason: "must be a string".to_string(),
                })?;
            TaskPriority::parse(value)?;
        }

        if let Some(args) = object.get("args") {
            if !args.is_object() {
                return Err(DirectorError::ValidationError {
                    field: "args".to_string(),
                    reason: "must be an object".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_minimal_payload() {
        assert!(InputValidator::validate_task_payload(&json!({"type": "email"})).is_ok());
    }

    #[test]
    fn accepts_full_payload() {
        let payload = json!({
            "type": "analysis",
            "title": "Quarterly review",
            "description": "Look at the numbers",
            "priority": "high",
            "args": {"quarter": "Q3"},
        });
        assert!(InputValidator::validate_task_payload(&payload).is_ok());
    }

    #[test]
    fn rejects_missing_or_invalid_type() {
        assert!(InputValidator::validate_task_payload(&json!({})).is_err());
        assert!(InputValidator::validate_task_payload(&json!({"type": ""})).is_err());
        assert!(InputValidator::validate_task_payload(&json!({"type": 7})).is_err());
        assert!(InputValidator::validate_task_payload(&json!([1, 2])).is_err());
    }

    #[test]
    fn rejects_unknown_priority() {
        let payload = json!({"type": "email", "priority": "urgent"});
        assert!(InputValidator::validate_task_payload(&payload).is_err());
    }

    #[test]
    fn rejects_oversized_title() {
        let payload = json!({"type": "email", "title": "x".repeat(300)});
        assert!(InputValidator::validate_task_payload(&payload).is_err());
    }
}
