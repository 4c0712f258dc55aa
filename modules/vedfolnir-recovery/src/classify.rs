//! Classification "by exception type + message patterns + context"
//!. `classify` handles the typed `VedfolnirError` cases
//! directly; `classify_message` is the message-pattern fallback used for
//! the opaque `Anyhow`/`Database` variants and for errors surfaced from
//! other crates (platform adapters, vision client) as plain strings.

use vedfolnir_common::VedfolnirError;

use crate::types::ErrorCategory;

pub fn classify(err: &VedfolnirError) -> ErrorCategory {
    match err {
        VedfolnirError::Authentication { .. } => ErrorCategory::Authentication,
        VedfolnirError::Platform { .. } => ErrorCategory::Platform,
        VedfolnirError::RateLimit { .. } => ErrorCategory::Platform,
        VedfolnirError::Resource(_) => ErrorCategory::Resource,
        VedfolnirError::Validation(_) => ErrorCategory::Validation,
        VedfolnirError::Configuration(_) => ErrorCategory::System,
        VedfolnirError::DetachedInstance { .. } => ErrorCategory::System,
        VedfolnirError::PlatformContext => ErrorCategory::System,
        VedfolnirError::Database(db_err) => classify_message(&db_err.to_string()),
        VedfolnirError::Anyhow(err) => classify_message(&err.to_string()),
    }
}

/// Heuristic classification from an error's rendered message, for errors
/// this crate has no typed variant for.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("invalid token")
        || lower.contains("401")
    {
        return ErrorCategory::Authentication;
    }
    if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("dns")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("network")
    {
        return ErrorCategory::Network;
    }
    if lower.contains("disk")
        || lower.contains("out of memory")
        || lower.contains("quota")
        || lower.contains("no space")
    {
        return ErrorCategory::Resource;
    }
    if lower.contains("validation") || lower.contains("invalid input") || lower.contains("malformed") {
        return ErrorCategory::Validation;
    }
    if lower.contains("5")
        && (lower.contains("status") || lower.contains("http"))
        && (lower.contains("500") || lower.contains("502") || lower.contains("503") || lower.contains("504"))
    {
        return ErrorCategory::Platform;
    }
    ErrorCategory::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_authentication_error_classifies_as_authentication() {
        let err = VedfolnirError::Authentication {
            connection_id: uuid::Uuid::new_v4(),
            message: "bad token".to_string(),
        };
        assert_eq!(classify(&err), ErrorCategory::Authentication);
    }

    #[test]
    fn typed_rate_limit_classifies_as_platform() {
        let err = VedfolnirError::RateLimit { retry_after_secs: 30 };
        assert_eq!(classify(&err), ErrorCategory::Platform);
    }

    #[test]
    fn message_pattern_detects_network_errors() {
        assert_eq!(classify_message("Connection refused (os error 111)"), ErrorCategory::Network);
        assert_eq!(classify_message("request timed out after 30s"), ErrorCategory::Network);
    }

    #[test]
    fn message_pattern_detects_resource_errors() {
        assert_eq!(classify_message("No space left on device"), ErrorCategory::Resource);
    }

    #[test]
    fn unmatched_message_is_unknown() {
        assert_eq!(classify_message("something weird happened"), ErrorCategory::Unknown);
    }
}
