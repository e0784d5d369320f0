//! Request validation.

use crate::api::error::ApiError;

/// Longest VM id or name accepted in a request path.
pub const MAX_VM_KEY_LEN: usize = 128;

/// Validate a VM id or name before it is passed to `prlctl`.
///
/// Rules:
/// - Length: 1..=[`MAX_VM_KEY_LEN`] characters
/// - Cannot start with a hyphen (it would be read as an option)
/// - No control characters
/// - No surrounding whitespace
pub fn validate_vm_key(key: &str) -> Result<(), ApiError> {
    if key.is_empty() {
        return Err(ApiError::BadRequest("VM id cannot be empty".into()));
    }

    if key.chars().count() > MAX_VM_KEY_LEN {
        return Err(ApiError::BadRequest(format!(
            "VM id too long: {} characters (max {})",
            key.chars().count(),
            MAX_VM_KEY_LEN
        )));
    }

    if key.starts_with('-') {
        return Err(ApiError::BadRequest(
            "VM id cannot start with a hyphen".into(),
        ));
    }

    if key.trim() != key {
        return Err(ApiError::BadRequest(
            "VM id cannot have leading or trailing whitespace".into(),
        ));
    }

    if let Some(c) = key.chars().find(|c| c.is_control()) {
        return Err(ApiError::BadRequest(format!(
            "VM id contains invalid character: {:?}",
            c
        )));
    }

    Ok(())
}
