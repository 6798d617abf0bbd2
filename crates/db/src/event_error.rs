use std::fmt;

/// Error returned by a metadata hook to reject an operation
#[derive(Debug, Clone, PartialEq)]
pub enum EventError {
    Validation {
        message: String,
        hint: Option<String>,
    },
    Hook {
        stage: String,
        message: String,
    },
    Aborted {
        reason: String,
    },
}

impl EventError {
    pub fn validation(message: &str) -> Self {
        Self::Validation {
            message: message.to_string(),
            hint: None,
        }
    }

    pub fn validation_with_hint(message: &str, hint: &str) -> Self {
        Self::Validation {
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    pub fn hook(stage: &str, message: &str) -> Self {
        Self::Hook {
            stage: stage.to_string(),
            message: message.to_string(),
        }
    }

    pub fn aborted(reason: &str) -> Self {
        Self::Aborted {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::Validation { message, hint } => {
                write!(f, "Validation error: {}", message)?;
                if let Some(hint) = hint {
                    write!(f, " (hint: {})", hint)?;
                }
                Ok(())
            }
            EventError::Hook { stage, message } => write!(f, "{} hook failed: {}", stage, message),
            EventError::Aborted { reason } => write!(f, "Operation aborted: {}", reason),
        }
    }
}

impl std::error::Error for EventError {}
