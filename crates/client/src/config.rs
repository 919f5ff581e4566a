//! Client configuration.
//!
//! Built once in `main` from the environment and passed down by value.
//! CLI flags override individual fields after construction.

use tracing::warn;

use crate::env::EnvReader;

/// Default API endpoint, overridable via `SNAPGATE_API`.
pub const DEFAULT_API_URL: &str = "https://snapgate.io/api/v1";

/// Widths the server renders at when a snapshot does not specify any.
pub const DEFAULT_WIDTHS: &[u32] = &[375, 1280];

/// Client configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// API access token (`SNAPGATE_TOKEN`). Required for any remote call.
    pub token: Option<String>,
    /// Base API URL without trailing slash (`SNAPGATE_API`).
    pub api_url: String,
    /// Debug logging requested via `SNAPGATE_DEBUG=1`.
    pub debug: bool,
    /// Render widths used when the CLI does not pass `--widths`
    /// (`SNAPGATE_WIDTHS`, comma-separated).
    pub default_widths: Vec<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_API_URL.to_string(),
            debug: false,
            default_widths: DEFAULT_WIDTHS.to_vec(),
        }
    }
}

impl Config {
    /// Resolves configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_env_in(&crate::env::ProcessEnv)
    }

    /// Resolves configuration from the given environment view.
    pub fn from_env_in(env: &dyn EnvReader) -> Self {
        let mut config = Config {
            token: env.get("SNAPGATE_TOKEN").filter(|t| !t.is_empty()),
            ..Config::default()
        };

        if let Some(api) = env.get("SNAPGATE_API").filter(|a| !a.is_empty()) {
            config.api_url = api.trim_end_matches('/').to_string();
        }

        config.debug = env.get("SNAPGATE_DEBUG").as_deref() == Some("1");

        if let Some(widths) = env.get("SNAPGATE_WIDTHS") {
            let parsed = parse_widths(&widths);
            if parsed.is_empty() {
                warn!(value = %widths, "SNAPGATE_WIDTHS has no usable entries, keeping defaults");
            } else {
                config.default_widths = parsed;
            }
        }

        config
    }
}

/// Parses a comma-separated width list, skipping entries that are not
/// positive integers.
pub fn parse_widths(value: &str) -> Vec<u32> {
    value
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            match part.parse::<u32>() {
                Ok(w) if w > 0 => Some(w),
                _ => {
                    warn!(entry = %part, "ignoring invalid width");
                    None
                }
            }
        })
        .collect()
}
