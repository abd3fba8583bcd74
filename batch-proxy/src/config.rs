use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Batch path must start with '/'")]
    InvalidBatchPath,

    #[error("Timeout must be greater than 0")]
    InvalidTimeout,

    #[error("Max concurrency must be greater than 0")]
    InvalidConcurrency,

    #[error("Empty session endpoint")]
    EmptySessionEndpoint,

    #[error("Empty duotone salt")]
    EmptyDuotoneSalt,

    #[error("Invalid duotone color: {0}")]
    InvalidDuotoneColor(String),
}

/// Batch proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for batch requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Path the batch endpoint is served on
    #[serde(default = "default_batch_path")]
    pub batch_path: String,
    /// Remote REST API settings
    pub api: ApiConfig,
    /// How the caller identity is read off inbound requests
    #[serde(default)]
    pub auth: AuthConfig,
    /// Policy for cookies forwarded from the session endpoint
    #[serde(default)]
    pub cookies: CookieConfig,
    /// Duotone image URL signing
    pub duotone: DuotoneConfig,
}

fn default_batch_path() -> String {
    "/mu_api".to_string()
}

impl Config {
    /// Validates the proxy configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !self.batch_path.starts_with('/') {
            return Err(ValidationError::InvalidBatchPath);
        }

        self.api.validate()?;
        self.duotone.validate()?;

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ApiConfig {
    /// Root of the remote REST API. Optional here so it can be supplied by
    /// the environment; a batch cannot run without it.
    pub base_url: Option<Url>,
    /// Timeout applied to every outbound call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on in-flight outbound calls per batch
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// The one endpoint whose Set-Cookie values are forwarded to the caller
    #[serde(default = "default_session_endpoint")]
    pub session_endpoint: String,
    /// Inbound header trusted to carry the client IP (first hop wins)
    pub trusted_ip_header: Option<String>,
    /// Query string parameter that explicitly overrides the client IP
    #[serde(default = "default_client_ip_override_param")]
    pub client_ip_override_param: String,
}

fn default_timeout_ms() -> u64 {
    8000
}

fn default_max_concurrency() -> usize {
    16
}

fn default_session_endpoint() -> String {
    "sessions".to_string()
}

fn default_client_ip_override_param() -> String {
    "__set_ip".to_string()
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.max_concurrency == 0 {
            return Err(ValidationError::InvalidConcurrency);
        }
        if self.session_endpoint.trim_matches('/').is_empty() {
            return Err(ValidationError::EmptySessionEndpoint);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Cookie holding the member session
    pub session_cookie: String,
    /// Header carrying the CSRF token that pairs with the session cookie
    pub csrf_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_cookie: "MEETUP_MEMBER".to_string(),
            csrf_header: "x-csrf-token".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CookieConfig {
    /// Mark forwarded cookies `Secure`; follows whether the deployment is served over https
    #[serde(default)]
    pub secure: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DuotoneConfig {
    /// Secret used to sign duotone URL roots
    pub salt: String,
    /// Root of the photo API the signed URLs point at
    pub base_url: Url,
    /// Supported (light, dark) color pairs, as six-digit hex
    #[serde(default)]
    pub pairs: Vec<(String, String)>,
}

impl DuotoneConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.salt.is_empty() {
            return Err(ValidationError::EmptyDuotoneSalt);
        }

        for color in self.pairs.iter().flat_map(|(light, dark)| [light, dark]) {
            let hex = color.trim_start_matches('#');
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ValidationError::InvalidDuotoneColor(color.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_YAML: &str = r##"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
api:
    base_url: "http://127.0.0.1:8080"
    timeout_ms: 2000
    max_concurrency: 4
    trusted_ip_header: fastly-client-ip
cookies:
    secure: true
duotone:
    salt: "s3cret"
    base_url: "https://photos.example.com/photo_api/event"
    pairs:
        - ["ff0000", "00ff00"]
        - ["#123abc", "#fedcba"]
"##;

    #[test]
    fn test_parse_valid_config() {
        let config: Config = serde_yaml::from_str(VALID_YAML).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 3000);
        assert_eq!(config.batch_path, "/mu_api");
        assert_eq!(config.api.timeout_ms, 2000);
        assert_eq!(config.api.max_concurrency, 4);
        assert_eq!(config.api.session_endpoint, "sessions");
        assert_eq!(config.api.client_ip_override_param, "__set_ip");
        assert_eq!(config.auth, AuthConfig::default());
        assert!(config.cookies.secure);
        assert_eq!(config.duotone.pairs.len(), 2);
    }

    #[test]
    fn test_validation_errors() {
        let base_config: Config = serde_yaml::from_str(VALID_YAML).unwrap();

        let mut config = base_config.clone();
        config.admin_listener.port = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidPort
        ));

        let mut config = base_config.clone();
        config.batch_path = "mu_api".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidBatchPath
        ));

        let mut config = base_config.clone();
        config.api.timeout_ms = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidTimeout
        ));

        let mut config = base_config.clone();
        config.api.max_concurrency = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidConcurrency
        ));

        let mut config = base_config.clone();
        config.duotone.salt = String::new();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::EmptyDuotoneSalt
        ));

        let mut config = base_config;
        config.duotone.pairs.push(("red".to_string(), "000000".to_string()));
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidDuotoneColor(_)
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
api: {base_url: "not-a-url"}
duotone: {salt: x, base_url: "https://photos.example.com"}
"#
            )
            .is_err()
        );

        // Missing duotone section
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
api: {}
"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_base_url_is_optional() {
        let config: Config = serde_yaml::from_str(
            r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
api: {}
duotone: {salt: x, base_url: "https://photos.example.com"}
"#,
        )
        .unwrap();

        assert!(config.api.base_url.is_none());
        assert!(config.validate().is_ok());
    }
}
