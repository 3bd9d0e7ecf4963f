//! # qrlink-core
//!
//! Core types, backend traits, configuration, and error handling for qrlink.

pub mod config;
pub mod error;
pub mod event;
pub mod traits;

/// Expand a leading `~/` to the user's home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shellexpand_absolute_untouched() {
        assert_eq!(shellexpand("/tmp/qrlink"), "/tmp/qrlink");
    }

    #[test]
    fn test_shellexpand_home_prefix() {
        let expanded = shellexpand("~/sessions");
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(expanded, format!("{home}/sessions"));
        } else {
            assert_eq!(expanded, "~/sessions");
        }
    }

    #[test]
    fn test_shellexpand_tilde_in_middle_untouched() {
        assert_eq!(shellexpand("/srv/~/x"), "/srv/~/x");
    }
}
