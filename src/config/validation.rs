use crate::{
    config::models::{
        AuthConfig, CacheConfig, FirewallConfig, MainConfig, RateLimitConfig, ServiceConfig,
    },
    core::ip_filter::IpNetwork,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator.
///
/// Conditionally-required fields (auth header/value, rate limit and cache
/// parameters) are only checked when their feature is enabled, mirroring the
/// configuration contract: a disabled block may be left half-filled.
pub struct MainConfigValidator;

impl MainConfigValidator {
    /// Validate an entire configuration snapshot, reporting every problem at once.
    pub fn validate(config: &MainConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.services.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "services".to_string(),
            });
        }

        for (name, service) in &config.services {
            if let Err(mut service_errors) = Self::validate_service(name, service) {
                errors.append(&mut service_errors);
            }
        }

        if let Some(global) = &config.global {
            if let Err(mut fw_errors) = Self::validate_firewall("global", &global.firewall) {
                errors.append(&mut fw_errors);
            }
            if let Some(rate_limit) = &global.rate_limit {
                if let Err(e) = Self::validate_rate_limit("global", rate_limit) {
                    errors.push(e);
                }
            }
            if let Some(cache) = &global.cache {
                if let Err(e) = Self::validate_cache("global", cache) {
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate a single service entry.
    fn validate_service(name: &str, service: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_url(&service.url, &format!("service '{name}' url")) {
            errors.push(e);
        }

        if let Err(mut fw_errors) = Self::validate_firewall(name, &service.firewall) {
            errors.append(&mut fw_errors);
        }

        if let Some(auth) = &service.auth {
            if let Err(mut auth_errors) = Self::validate_auth(name, auth) {
                errors.append(&mut auth_errors);
            }
        }

        if let Some(rate_limit) = &service.rate_limit {
            if let Err(e) = Self::validate_rate_limit(name, rate_limit) {
                errors.push(e);
            }
        }

        if let Some(cache) = &service.cache {
            if let Err(e) = Self::validate_cache(name, cache) {
                errors.push(e);
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Validate upstream URL format: absolute, http or https, with a host.
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        if url_str.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: context.to_string(),
            });
        }

        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Every IP-or-CIDR literal must be independently parseable.
    fn validate_firewall(
        scope: &str,
        firewall: &FirewallConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for literal in firewall.ip_literals() {
            if let Err(e) = IpNetwork::parse(literal) {
                errors.push(ValidationError::InvalidField {
                    field: format!("'{scope}' ip list entry '{literal}'"),
                    message: e,
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_auth(scope: &str, auth: &AuthConfig) -> Result<(), Vec<ValidationError>> {
        if !auth.enabled {
            return Ok(());
        }

        let mut errors = Vec::new();

        if auth.header_name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("service '{scope}' auth.header_name"),
            });
        }

        if auth.value.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("service '{scope}' auth.value"),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_rate_limit(scope: &str, config: &RateLimitConfig) -> ValidationResult<()> {
        if !config.enabled {
            return Ok(());
        }

        if config.max_requests == 0 {
            return Err(ValidationError::InvalidField {
                field: format!("'{scope}' rate_limit.max_requests"),
                message: "Must be greater than 0 when rate limiting is enabled".to_string(),
            });
        }

        match config.window() {
            Some(window) if !window.is_zero() => Ok(()),
            Some(_) => Err(ValidationError::InvalidField {
                field: format!("'{scope}' rate_limit.period"),
                message: "Must be a positive duration".to_string(),
            }),
            None => Err(ValidationError::InvalidField {
                field: format!("'{scope}' rate_limit.period"),
                message: "Must be a duration like '1s', '5m', or '1h'".to_string(),
            }),
        }
    }

    fn validate_cache(scope: &str, config: &CacheConfig) -> ValidationResult<()> {
        if !config.enabled {
            return Ok(());
        }

        match config.ttl_duration() {
            Some(ttl) if !ttl.is_zero() => Ok(()),
            Some(_) => Err(ValidationError::InvalidField {
                field: format!("'{scope}' cache.ttl"),
                message: "Must be a positive duration".to_string(),
            }),
            None => Err(ValidationError::InvalidField {
                field: format!("'{scope}' cache.ttl"),
                message: "Must be a duration like '5s' or '2m'".to_string(),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
