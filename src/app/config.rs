use std::path::Path;

use crate::config::ResolvedConfig;
use crate::duration::format_duration;

pub fn config_output(config_path: &Path, config: &ResolvedConfig) -> serde_json::Value {
    let redacted = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
    serde_json::json!({
        "config_file": config_path.display().to_string(),
        "data_directory": config.data_dir.display().to_string(),
        "plaid": {
            "environment": config.plaid.environment.as_str(),
            "base_url": config.plaid.base_url,
            "client_id": redacted(&config.plaid.client_id),
            "secret": redacted(&config.plaid.secret),
            "request_timeout": format_duration(config.plaid.request_timeout),
        },
        "aggregation": {
            "noise_threshold": config.aggregation.noise_threshold.to_string(),
            "lookback_months": config.aggregation.lookback_months,
            "excluded_categories": config.aggregation.excluded_categories,
        },
        "webhook": {
            "max_token_age": format_duration(config.webhook.max_token_age),
        },
        "retry": {
            "max_attempts": config.retry.max_attempts,
            "delays": config.retry.delays.iter().map(|d| format_duration(*d)).collect::<Vec<_>>(),
            "store_timeout": format_duration(config.retry.store_timeout),
        },
        "reconciliation": {
            "grace_period": format_duration(config.reconciliation.grace_period),
            "scan_interval": format_duration(config.reconciliation.scan_interval),
            "jitter": format_duration(config.reconciliation.jitter),
            "concurrency": config.reconciliation.concurrency,
        }
    })
}
