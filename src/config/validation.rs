use super::{AppConfig, BackendConfig, ConfigError, CountTokensConfig, InterceptorSetting};
use crate::interceptor::InterceptorRegistry;

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(
    config: &AppConfig,
    interceptors: &InterceptorRegistry,
) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_backend("backend", &config.backend, interceptors)?;
    if let Some(vision) = &config.vision_backend {
        validate_backend("vision_backend", vision, interceptors)?;
    }
    if let Some(count_tokens) = &config.count_tokens {
        validate_count_tokens(count_tokens)?;
    }
    validate_log_level(config)?;
    validate_features(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.host.trim().is_empty() {
        return Err(validation_err("server.host cannot be empty"));
    }
    if server.port == 0 {
        return Err(validation_err("server.port must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_base_url(field: &str, base_url: &str) -> Result<(), ConfigError> {
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(validation_err(format!(
            "{field}.base_url must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_count_tokens(count_tokens: &CountTokensConfig) -> Result<(), ConfigError> {
    validate_base_url("count_tokens", &count_tokens.base_url)?;
    if count_tokens.api_key.trim().is_empty() {
        return Err(validation_err("count_tokens.api_key cannot be empty"));
    }
    if count_tokens.model.trim().is_empty() {
        return Err(validation_err("count_tokens.model cannot be empty"));
    }
    Ok(())
}

fn validate_backend(
    field: &str,
    backend: &BackendConfig,
    interceptors: &InterceptorRegistry,
) -> Result<(), ConfigError> {
    validate_base_url(field, &backend.base_url)?;
    if backend
        .api_key
        .as_deref()
        .is_some_and(|key| key.trim().is_empty())
    {
        return Err(validation_err(format!(
            "{field}.api_key cannot be empty when set"
        )));
    }
    if backend
        .model
        .as_deref()
        .is_some_and(|model| model.trim().is_empty())
    {
        return Err(validation_err(format!(
            "{field}.model cannot be empty when set"
        )));
    }
    if let InterceptorSetting::Named(name) = &backend.interceptor {
        if interceptors.by_name(name).is_none() {
            let known: Vec<&str> = interceptors.names().collect();
            return Err(validation_err(format!(
                "{field}.interceptor '{name}' is unknown. Must be auto, none, or one of: {}",
                known.join(", ")
            )));
        }
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_features(config: &AppConfig) -> Result<(), ConfigError> {
    let features = &config.features;
    if features.vision_keep_rounds == 0 {
        return Err(validation_err(
            "features.vision_keep_rounds must be at least 1",
        ));
    }
    if !features.token_scale.is_finite() || features.token_scale <= 0.0 {
        return Err(validation_err(
            "features.token_scale must be a finite number greater than 0",
        ));
    }
    Ok(())
}
