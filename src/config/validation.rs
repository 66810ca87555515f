use crate::config::types::Config;
use crate::ConfigError;

/// Validates a parsed configuration
///
/// Checks host shapes, market/token consistency, and pool bounds before a
/// run is allowed to start.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_host(&config.site.primary_host)?;
    for host in &config.site.alt_hosts {
        validate_host(host)?;
    }

    if config.site.markets.is_empty() {
        return Err(ConfigError::Validation(
            "at least one market must be configured".to_string(),
        ));
    }

    for market in &config.site.markets {
        if !config.site.location_tokens.contains_key(market) {
            return Err(ConfigError::Validation(format!(
                "market '{market}' has no location token"
            )));
        }
    }

    for entry in &config.index {
        if !config.site.markets.iter().any(|m| m == &entry.market) {
            return Err(ConfigError::Validation(format!(
                "index snapshot references unknown market '{}'",
                entry.market
            )));
        }
    }

    if config.crawler.item_concurrency == 0 || config.crawler.seller_concurrency == 0 {
        return Err(ConfigError::Validation(
            "pool concurrency must be at least 1".to_string(),
        ));
    }

    if config.crawler.review_page_size == 0 {
        return Err(ConfigError::Validation(
            "review-page-size must be at least 1".to_string(),
        ));
    }

    // One credential without the other is a configuration mistake, not an
    // anonymous session.
    if config.session.username.is_some() != config.session.password.is_some() {
        return Err(ConfigError::Validation(
            "session credentials must include both username and password".to_string(),
        ));
    }

    Ok(())
}

fn validate_host(host: &str) -> Result<(), ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::InvalidHost("(empty)".to_string()));
    }
    if host.contains("://") || host.contains('/') {
        return Err(ConfigError::InvalidHost(format!(
            "{host} (expected a bare hostname, no scheme or path)"
        )));
    }
    Ok(())
}
