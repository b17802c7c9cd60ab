use std::env;

// ============================================================================
// Configuration
// ============================================================================
//
// Environment-driven, resolved once at startup. `RUST_LOG` is handled by
// the tracing EnvFilter in main; everything the core itself needs is here.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Postgres connection string. When absent the demo binary runs against
    /// the in-memory store.
    pub database_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
        }
    }
}
