//! Access-layer configuration.

/// Configuration for tenant resolution and throttling.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// PEM-encoded Ed25519 public key used to verify bearer tokens.
    /// Empty disables bearer resolution.
    pub jwt_public_key_pem: String,
    /// Expected `iss` claim.
    pub jwt_issuer: String,
    /// Domain tenants are served under, e.g. `cellar.app` for
    /// `acme.cellar.app`.
    pub base_domain: String,
    /// Requests per minute allowed from one IP address.
    pub ip_requests_per_minute: u64,
    /// Login attempts allowed per identifier per 15-minute block.
    pub login_attempts_per_block: u64,
    /// Turn all rate limiting off (local development).
    pub rate_limit_enabled: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            jwt_public_key_pem: String::new(),
            jwt_issuer: "cellar".into(),
            base_domain: "localhost".into(),
            ip_requests_per_minute: 300,
            login_attempts_per_block: 5,
            rate_limit_enabled: true,
        }
    }
}

impl AccessConfig {
    /// Read `CELLAR_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let num = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        Self {
            jwt_public_key_pem: std::env::var("CELLAR_JWT_PUBLIC_KEY")
                .unwrap_or(defaults.jwt_public_key_pem),
            jwt_issuer: std::env::var("CELLAR_JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            base_domain: std::env::var("CELLAR_BASE_DOMAIN").unwrap_or(defaults.base_domain),
            ip_requests_per_minute: num(
                "CELLAR_IP_REQUESTS_PER_MINUTE",
                defaults.ip_requests_per_minute,
            ),
            login_attempts_per_block: num(
                "CELLAR_LOGIN_ATTEMPTS_PER_BLOCK",
                defaults.login_attempts_per_block,
            ),
            rate_limit_enabled: std::env::var("CELLAR_RATE_LIMIT_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.rate_limit_enabled),
        }
    }
}
