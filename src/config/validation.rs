use crate::config::types::{
    Config, JobTypeConfig, ManagerConfig, PolitenessConfig, StorageConfig, UserAgentConfig,
    WorkerConfig,
};
use crate::process::{PredicateLimitation, ProcessDefinition, StepDefinition};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_manager_config(&config.manager)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_politeness_config(&config.politeness)?;
    validate_job_type_config("robots-check", &config.robots_check)?;
    validate_job_type_config("domain-crawl", &config.domain_crawl)?;
    validate_worker_config(&config.worker)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

fn validate_manager_config(config: &ManagerConfig) -> Result<(), ConfigError> {
    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll-interval-ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    if config.idle_polls_before_check < 1 {
        return Err(ConfigError::Validation(
            "idle-polls-before-check must be >= 1".to_string(),
        ));
    }

    if config.resources_per_domain < 1 {
        return Err(ConfigError::Validation(format!(
            "resources-per-domain must be >= 1, got {}",
            config.resources_per_domain
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    // The name doubles as the robots.txt product token
    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.minimum_crawl_delay_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "minimum-crawl-delay-ms must be >= 100ms, got {}ms",
            config.minimum_crawl_delay_ms
        )));
    }

    if config.maximum_crawl_delay_ms < config.minimum_crawl_delay_ms {
        return Err(ConfigError::Validation(format!(
            "maximum-crawl-delay-ms ({}) must be >= minimum-crawl-delay-ms ({})",
            config.maximum_crawl_delay_ms, config.minimum_crawl_delay_ms
        )));
    }

    if config.robots_error_delay_ms < config.minimum_crawl_delay_ms {
        return Err(ConfigError::Validation(format!(
            "robots-error-delay-ms ({}) must be >= minimum-crawl-delay-ms ({})",
            config.robots_error_delay_ms, config.minimum_crawl_delay_ms
        )));
    }

    Ok(())
}

fn validate_job_type_config(name: &str, config: &JobTypeConfig) -> Result<(), ConfigError> {
    if config.timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "{}.timeout-ms must be >= 100ms, got {}ms",
            name, config.timeout_ms
        )));
    }
    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.robots_check_capacity == 0 && config.domain_crawl_capacity == 0 {
        return Err(ConfigError::Validation(
            "worker capacities cannot both be zero".to_string(),
        ));
    }

    if config.resources_per_domain < 1 {
        return Err(ConfigError::Validation(
            "worker.resources-per-domain must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "worker.request-timeout-ms must be >= 100ms, got {}ms",
            config.request_timeout_ms
        )));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates a process definition before it is stored
pub fn validate_process_definition(definition: &ProcessDefinition) -> Result<(), ConfigError> {
    if definition.seeds.is_empty() {
        return Err(ConfigError::Validation(
            "a process needs at least one seed URL".to_string(),
        ));
    }

    for seed in &definition.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use the http or https scheme",
                seed
            )));
        }
    }

    if definition.steps.is_empty() {
        return Err(ConfigError::Validation(
            "a process needs at least one step".to_string(),
        ));
    }

    for step in &definition.steps {
        validate_step_definition(step)?;
    }

    Ok(())
}

/// Validates one step of a process definition
pub fn validate_step_definition(step: &StepDefinition) -> Result<(), ConfigError> {
    if step.max_path_length < 1 {
        return Err(ConfigError::Validation(
            "max-path-length must be >= 1 (the seed itself)".to_string(),
        ));
    }

    if step.lower_threshold > step.upper_threshold {
        return Err(ConfigError::Validation(format!(
            "lower-threshold ({}) must not exceed upper-threshold ({})",
            step.lower_threshold, step.upper_threshold
        )));
    }

    if let PredicateLimitation::Whitelist(list) = &step.predicates {
        if list.is_empty() {
            return Err(ConfigError::Validation(
                "an empty predicate whitelist would never extend a path".to_string(),
            ));
        }
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
