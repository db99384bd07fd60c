pub const DEFAULT_API_URL: &str = "http://127.0.0.1:12315";
pub const DEFAULT_NOTES_PREFIX: &str = "Claude Notes";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("LOGSEQ_API_TOKEN environment variable is required")]
    MissingToken,
    #[error("Invalid Logseq API URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ConfigError {
    pub fn docs_hint(&self) -> &'static str {
        match self {
            ConfigError::MissingToken => {
                "Enable the HTTP API server in Logseq, create an authorization token, and export it as LOGSEQ_API_TOKEN (or pass --token)."
            }
            ConfigError::InvalidUrl { .. } => {
                "Pass an absolute http(s) URL such as http://127.0.0.1:12315 via --api-url or LOGSEQ_API_URL."
            }
        }
    }
}

/// Immutable settings held by the gateway for its whole lifetime.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub api_url: String,
    pub token: String,
}

impl GatewayConfig {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self, ConfigError> {
        let token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let api_url = api_url.trim().trim_end_matches('/').to_string();
        let parsed = reqwest::Url::parse(&api_url).map_err(|e| ConfigError::InvalidUrl {
            url: api_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: api_url,
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        Ok(Self { api_url, token })
    }

    /// The single RPC endpoint every gateway call is POSTed to.
    pub fn endpoint(&self) -> String {
        format!("{}/api", self.api_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_token_is_rejected() {
        assert!(matches!(
            GatewayConfig::new(DEFAULT_API_URL, None),
            Err(ConfigError::MissingToken)
        ));
        assert!(matches!(
            GatewayConfig::new(DEFAULT_API_URL, Some("   ".to_string())),
            Err(ConfigError::MissingToken)
        ));
    }

    #[test]
    fn trailing_slash_is_stripped_from_endpoint() {
        let config = GatewayConfig::new("http://localhost:12315/", Some("tok".to_string())).unwrap();
        assert_eq!(config.api_url, "http://localhost:12315");
        assert_eq!(config.endpoint(), "http://localhost:12315/api");
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let err = GatewayConfig::new("ftp://localhost", Some("tok".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
        let err = GatewayConfig::new("not a url", Some("tok".to_string())).unwrap_err();
        assert!(err.to_string().contains("not a url"));
    }
}
