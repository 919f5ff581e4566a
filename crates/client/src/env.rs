//! Environment variable access seam.
//!
//! Config and CI detection read variables through [`EnvReader`] so tests
//! can supply a fixed map instead of mutating process state.

use std::collections::HashMap;

/// Read-only view of environment variables.
pub trait EnvReader {
    /// Returns the value of `key`, or `None` if unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from the real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvReader for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvReader for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_env_returns_values() {
        let mut env = HashMap::new();
        env.insert("SNAPGATE_TOKEN".to_string(), "abc".to_string());

        assert_eq!(
            EnvReader::get(&env, "SNAPGATE_TOKEN"),
            Some("abc".to_string())
        );
        assert_eq!(EnvReader::get(&env, "UNSET_VARIABLE"), None);
    }

    #[test]
    fn process_env_reads_path() {
        // PATH is set in any sane test environment.
        assert!(ProcessEnv.get("PATH").is_some());
    }
}
