use once_cell::sync::Lazy;

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// key: billing-config -> provider endpoint
pub static BILLING_API_BASE_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("BILLING_API_BASE_URL")
        .unwrap_or_else(|| "https://api.stripe.com".to_string())
});

/// key: billing-config -> per-request timeout against the provider
pub static BILLING_API_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("BILLING_API_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(30)
});

/// key: billing-config -> objects requested per list page (provider caps at 100)
pub static BILLING_LIST_PAGE_SIZE: Lazy<u32> = Lazy::new(|| {
    std::env::var("BILLING_LIST_PAGE_SIZE")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .map(|value| value.clamp(1, 100))
        .unwrap_or(100)
});

/// Email seeds used by `/search_customers` when the request names none.
/// Comma-separated via `DEFAULT_EMAIL_ADDRESSES`.
pub static DEFAULT_EMAIL_ADDRESSES: Lazy<Vec<String>> =
    Lazy::new(|| read_list_env("DEFAULT_EMAIL_ADDRESSES"));

/// Customer id seeds used by `/search_subscriptions` when the request names
/// none. Comma-separated via `DEFAULT_CUSTOMER_IDS`.
pub static DEFAULT_CUSTOMER_IDS: Lazy<Vec<String>> =
    Lazy::new(|| read_list_env("DEFAULT_CUSTOMER_IDS"));

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_list_env(key: &str) -> Vec<String> {
    read_optional_env(key)
        .map(|value| split_list(&value))
        .unwrap_or_default()
}

/// Splits a comma-separated list, trimming entries and dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|entry| {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}
