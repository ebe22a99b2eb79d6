//! Validation gate run before any parser sees an upload.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. byte stream and file name are non-empty
//! 2. extension is on the allow-list and not on the deny-list (case-insensitive)
//! 3. declared and actual size are within the configured maximum
//! 4. file name has no path separators, traversal sequences, or control characters

use crate::config::ValidationConfig;
use crate::error::{ValidationError, ValidationFailure};
use crate::types::{FileFormat, RawUpload};

/// Validate `upload` against `config`.
pub fn validate_upload(upload: &RawUpload, config: &ValidationConfig) -> Result<(), ValidationError> {
    if upload.bytes.is_empty() {
        return Err(ValidationError::new(
            ValidationFailure::Empty,
            "upload contains no data",
        ));
    }
    if upload.file_name.trim().is_empty() {
        return Err(ValidationError::new(
            ValidationFailure::Empty,
            "file name is empty",
        ));
    }

    check_file_name(&upload.file_name)?;
    check_extension(&upload.file_name, config)?;

    let actual = upload.bytes.len() as u64;
    let size = upload.declared_size.max(actual);
    if size > config.max_file_bytes {
        return Err(ValidationError::new(
            ValidationFailure::TooLarge,
            format!(
                "file size {size} bytes exceeds the maximum of {} bytes",
                config.max_file_bytes
            ),
        ));
    }

    Ok(())
}

fn check_extension(file_name: &str, config: &ValidationConfig) -> Result<(), ValidationError> {
    let ext = FileFormat::extension_of(file_name)
        .ok_or_else(|| {
            ValidationError::new(
                ValidationFailure::ExtensionNotAllowed,
                format!("file '{file_name}' has no extension"),
            )
        })?
        .to_ascii_lowercase();

    if config
        .denied_extensions
        .iter()
        .any(|d| normalize_ext(d) == ext)
    {
        return Err(ValidationError::new(
            ValidationFailure::ExtensionDenied,
            format!("extension '.{ext}' is not permitted"),
        ));
    }

    if !config
        .allowed_extensions
        .iter()
        .any(|a| normalize_ext(a) == ext)
    {
        return Err(ValidationError::new(
            ValidationFailure::ExtensionNotAllowed,
            format!(
                "extension '.{ext}' is not supported (allowed: {})",
                config.allowed_extensions.join(", ")
            ),
        ));
    }

    Ok(())
}

fn check_file_name(file_name: &str) -> Result<(), ValidationError> {
    let unsafe_char = file_name
        .chars()
        .find(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control());
    if let Some(c) = unsafe_char {
        return Err(ValidationError::new(
            ValidationFailure::UnsafeFileName,
            format!("file name contains forbidden character {c:?}"),
        ));
    }
    // Separators are already rejected, so only the bare relative names can traverse.
    if matches!(file_name.trim(), "." | "..") {
        return Err(ValidationError::new(
            ValidationFailure::UnsafeFileName,
            "file name is a relative path component",
        ));
    }
    Ok(())
}

fn normalize_ext(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
