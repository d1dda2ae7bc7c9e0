//! Input validation and sanitization.
//!
//! Every prompt is validated before it reaches a provider.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Validation error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Input exceeds maximum allowed length.
    #[error("Input exceeds maximum length ({max} bytes, got {actual})")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual input length.
        actual: usize,
    },

    /// Input is empty or only whitespace.
    #[error("Input must not be empty")]
    Empty,

    /// A required field is missing or malformed.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Size limits per input type.
pub mod limits {
    /// Maximum prompt length (32KB).
    pub const MAX_PROMPT_LENGTH: usize = 32 * 1024;

    /// Maximum model identifier length.
    pub const MAX_MODEL_NAME_LENGTH: usize = 128;

    /// Maximum config file size (1MB).
    pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
}

/// Validate and sanitize message content.
///
/// Performs:
/// 1. Length check (prevent memory exhaustion)
/// 2. Strip null bytes and control chars (except newlines/tabs)
/// 3. Unicode normalization (NFKC)
///
/// # Errors
///
/// Returns `ValidationError::TooLong` if input exceeds `max_len`.
pub fn validate_message_content(input: &str, max_len: usize) -> Result<String, ValidationError> {
    if input.len() > max_len {
        return Err(ValidationError::TooLong {
            max: max_len,
            actual: input.len(),
        });
    }

    let sanitized: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t' || *c == '\r')
        .collect();

    let normalized: String = sanitized.nfkc().collect();

    Ok(normalized)
}

/// Validate a prompt: sanitized, bounded, and not blank.
///
/// # Errors
///
/// Returns `ValidationError::Empty` for blank prompts (also after sanitizing)
/// and `ValidationError::TooLong` for oversized ones.
pub fn validate_prompt(input: &str) -> Result<String, ValidationError> {
    if input.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    let prompt = validate_message_content(input, limits::MAX_PROMPT_LENGTH)?;
    if prompt.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    Ok(prompt)
}

/// Validate a caller-supplied model identifier.
///
/// # Errors
///
/// Returns `ValidationError::InvalidField` if the name is blank, too long,
/// or contains characters no provider uses in model names.
pub fn validate_model_name(model: &str) -> Result<(), ValidationError> {
    if model.trim().is_empty() {
        return Err(ValidationError::InvalidField {
            field: "model",
            reason: "must not be empty".to_string(),
        });
    }

    if model.len() > limits::MAX_MODEL_NAME_LENGTH {
        return Err(ValidationError::InvalidField {
            field: "model",
            reason: format!("longer than {} bytes", limits::MAX_MODEL_NAME_LENGTH),
        });
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':');
    if !model.chars().all(allowed) {
        return Err(ValidationError::InvalidField {
            field: "model",
            reason: "contains disallowed characters".to_string(),
        });
    }

    Ok(())
}

/// Shorten `text` to at most `max_bytes`, cutting on a character boundary.
pub fn truncate_on_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
