//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub autologin: AutologinConfig,
    pub launch: LaunchConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "exam.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the site
    ///
    /// # Returns
    /// Full URL like "https://exam.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    /// Whether the public protocol is HTTPS
    pub fn is_https(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("https")
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Authentication and session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session secret key (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
    /// Maximum concurrent sessions per user; 0 = unlimited
    pub concurrent_login_limit: u32,
    /// Site-wide toggle for remote (web-service) login.
    /// Token redemption is refused while this is off.
    pub webservice_login_enabled: bool,
}

/// Auto-login token configuration
///
/// The two TTLs belong to the two issuance call sites: the redirect
/// endpoint and the quiz view-page launch link.
#[derive(Debug, Clone, Deserialize)]
pub struct AutologinConfig {
    /// Token lifetime for the issue endpoint, in seconds (default: 300)
    pub issue_ttl_secs: i64,
    /// Token lifetime for view-page launch links, in seconds (default: 900)
    pub launch_ttl_secs: i64,
}

/// Exam-client URL scheme map
///
/// The redeem URL is handed to the exam client under a custom scheme in
/// place of http/https, selected by whether the issuing request was secure.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConfig {
    /// Scheme used when the issuing request was over HTTPS (default: "sebs")
    pub secure_scheme: String,
    /// Scheme used otherwise (default: "seb")
    pub insecure_scheme: String,
}

impl LaunchConfig {
    /// Select the exam-client scheme for the given transport security
    pub fn scheme_for(&self, secure: bool) -> &str {
        if secure {
            &self.secure_scheme
        } else {
            &self.insecure_scheme
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (EXAMGATE_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("auth.concurrent_login_limit", 0)?
            .set_default("auth.webservice_login_enabled", true)?
            .set_default("autologin.issue_ttl_secs", 300)?
            .set_default("autologin.launch_ttl_secs", 900)?
            .set_default("launch.secure_scheme", "sebs")?
            .set_default("launch.insecure_scheme", "seb")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (EXAMGATE_*)
            .add_source(
                Environment::with_prefix("EXAMGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.is_https() || !is_local_server_domain(&self.server.domain)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.as_bytes().len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.autologin.issue_ttl_secs <= 0 || self.autologin.launch_ttl_secs <= 0 {
            return Err(crate::error::AppError::Config(
                "autologin TTLs must be greater than 0".to_string(),
            ));
        }

        if self.launch.secure_scheme.is_empty() || self.launch.insecure_scheme.is_empty() {
            return Err(crate::error::AppError::Config(
                "launch schemes must not be empty".to_string(),
            ));
        }

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        } else if !self.server.is_https() {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/examgate-test.db"),
            },
            auth: AuthConfig {
                session_secret: "x".repeat(32),
                session_max_age: 604_800,
                concurrent_login_limit: 0,
                webservice_login_enabled: true,
            },
            autologin: AutologinConfig {
                issue_ttl_secs: 300,
                launch_ttl_secs: 900,
            },
            launch: LaunchConfig {
                secure_scheme: "sebs".to_string(),
                insecure_scheme: "seb".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_http_on_localhost() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        assert!(!config.should_use_secure_cookies());
    }

    #[test]
    fn validate_rejects_short_session_secret() {
        let mut config = valid_config();
        config.auth.session_secret = "short-secret".to_string();

        let error = config
            .validate()
            .expect_err("session secret shorter than 32 bytes must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("auth.session_secret")
        ));
    }

    #[test]
    fn validate_rejects_http_for_non_local_domain() {
        let mut config = valid_config();
        config.server.domain = "exam.example.com".to_string();
        config.server.protocol = "http".to_string();

        let error = config
            .validate()
            .expect_err("public domains must require https");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("server.protocol must be https")
        ));
    }

    #[test]
    fn validate_rejects_non_positive_ttls() {
        let mut config = valid_config();
        config.autologin.issue_ttl_secs = 0;

        let error = config.validate().expect_err("zero TTL must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("TTLs")
        ));
    }

    #[test]
    fn scheme_selection_follows_transport_security() {
        let config = valid_config();
        assert_eq!(config.launch.scheme_for(true), "sebs");
        assert_eq!(config.launch.scheme_for(false), "seb");
    }
}
