use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One identity in the secrets file: `[{"id": ..., "secret": ..., "ttl": ...}, ...]`.
/// Field names must round-trip exactly; array order is whatever the last write produced.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecretRecord {
    pub id: String,
    /// Base32 (RFC 4648, no padding) encoded shared secret.
    pub secret: String,
    /// Session token lifetime in seconds for this identity.
    pub ttl: u64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginForm {
    pub id: String,
    pub totp: String,
}
