use std::path::PathBuf;

pub const DEFAULT_TOKEN_TTL: u64 = 300;

/// Runtime configuration, resolved once at startup. Values are validated
/// loosely: anything unparseable falls back to its default.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding `secrets.json`.
    pub secret_dir: PathBuf,
    /// Session TTL (seconds) for identities that never had one recorded.
    pub default_ttl: u64,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        fn u64_env(name: &str, default: u64) -> u64 {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        }
        let secret_dir = std::env::var("SECRET_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_secret_dir);
        Self {
            secret_dir,
            default_ttl: u64_env("TOKEN_TTL", DEFAULT_TOKEN_TTL),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        }
    }

    pub fn secrets_file(&self) -> PathBuf {
        self.secret_dir.join("secrets.json")
    }
}

fn default_secret_dir() -> PathBuf {
    if cfg!(windows) {
        let base = std::env::var("ALLUSERSPROFILE").unwrap_or_else(|_| "C:\\ProgramData".to_string());
        PathBuf::from(base).join("totpgate")
    } else {
        PathBuf::from("/etc/totpgate")
    }
}
