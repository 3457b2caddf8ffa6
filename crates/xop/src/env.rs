use std::env;
use std::path::PathBuf;

/// Explicit path to the foreign bridge library; overrides the platform candidates.
pub const BRIDGE_LIBRARY_VAR: &str = "XOP_BRIDGE_LIBRARY";
/// Toggles forwarding of foreign-side log messages into `tracing`.
pub const FOREIGN_LOG_VAR: &str = "XOP_FOREIGN_LOG";

pub(crate) fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn bool_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    }
}

pub(crate) fn path_var(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", " YES ", "on"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", ""] {
            assert!(!parse_bool(value), "{value}");
        }
    }
}
