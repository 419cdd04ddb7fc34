/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent with registry requests.
#[must_use]
pub fn user_agent() -> String {
    format!(
        "grove/{VERSION} ({} {})",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_names_tool() {
        assert!(user_agent().starts_with(&format!("grove/{VERSION}")));
    }
}
