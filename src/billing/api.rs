use axum::{
    extract::{Extension, Query},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::{RecordBatch, RecordsService};
use crate::config::{self, split_list};
use crate::error::{AppError, AppResult};

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// key: billing-api -> query parameters shared by the record endpoints
#[derive(Debug, Default, Deserialize)]
pub struct RecordsQuery {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub email_addresses: Option<String>,
    #[serde(default)]
    pub cus_ids: Option<String>,
    #[serde(default)]
    pub sub_ids: Option<String>,
    #[serde(default)]
    pub ch_ids: Option<String>,
}

impl RecordsQuery {
    fn api_key(&self) -> AppResult<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AppError::Validation("`api_key` is required".to_string()))
    }
}

/// Comma-separated seeds from `raw`, falling back to `defaults` when none
/// are given.
pub fn parse_seeds(raw: Option<&str>, param: &str, defaults: &[String]) -> AppResult<Vec<String>> {
    let seeds = raw.map(split_list).unwrap_or_default();
    let seeds = if seeds.is_empty() {
        defaults.to_vec()
    } else {
        seeds
    };
    if seeds.is_empty() {
        return Err(AppError::Validation(format!(
            "`{param}` must name at least one value"
        )));
    }
    Ok(seeds)
}

pub fn validate_emails(emails: &[String]) -> AppResult<()> {
    match emails.iter().find(|email| !EMAIL_PATTERN.is_match(email)) {
        Some(invalid) => Err(AppError::Validation(format!(
            "`{invalid}` is not a valid email address"
        ))),
        None => Ok(()),
    }
}

pub async fn search_customers(
    Extension(service): Extension<RecordsService>,
    Query(query): Query<RecordsQuery>,
) -> AppResult<Json<RecordBatch>> {
    let api_key = query.api_key()?;
    let emails = parse_seeds(
        query.email_addresses.as_deref(),
        "email_addresses",
        &config::DEFAULT_EMAIL_ADDRESSES,
    )?;
    validate_emails(&emails)?;
    Ok(Json(service.customers_by_email(api_key, &emails).await?))
}

pub async fn search_subscriptions(
    Extension(service): Extension<RecordsService>,
    Query(query): Query<RecordsQuery>,
) -> AppResult<Json<RecordBatch>> {
    let api_key = query.api_key()?;
    let customer_ids = parse_seeds(
        query.cus_ids.as_deref(),
        "cus_ids",
        &config::DEFAULT_CUSTOMER_IDS,
    )?;
    Ok(Json(
        service
            .subscriptions_by_customer(api_key, &customer_ids)
            .await?,
    ))
}

pub async fn get_subscriptions(
    Extension(service): Extension<RecordsService>,
    Query(query): Query<RecordsQuery>,
) -> AppResult<Json<RecordBatch>> {
    let api_key = query.api_key()?;
    let subscription_ids = parse_seeds(query.sub_ids.as_deref(), "sub_ids", &[])?;
    Ok(Json(
        service
            .subscriptions_by_id(api_key, &subscription_ids)
            .await?,
    ))
}

pub async fn get_subscription_items(
    Extension(service): Extension<RecordsService>,
    Query(query): Query<RecordsQuery>,
) -> AppResult<Json<RecordBatch>> {
    let api_key = query.api_key()?;
    let subscription_ids = parse_seeds(query.sub_ids.as_deref(), "sub_ids", &[])?;
    Ok(Json(
        service
            .subscription_items(api_key, &subscription_ids)
            .await?,
    ))
}

pub async fn get_charges(
    Extension(service): Extension<RecordsService>,
    Query(query): Query<RecordsQuery>,
) -> AppResult<Json<RecordBatch>> {
    let api_key = query.api_key()?;
    let subscription_ids = parse_seeds(query.sub_ids.as_deref(), "sub_ids", &[])?;
    Ok(Json(
        service
            .charges_by_subscription(api_key, &subscription_ids)
            .await?,
    ))
}

pub async fn get_invoices(
    Extension(service): Extension<RecordsService>,
    Query(query): Query<RecordsQuery>,
) -> AppResult<Json<RecordBatch>> {
    let api_key = query.api_key()?;
    let subscription_ids = parse_seeds(query.sub_ids.as_deref(), "sub_ids", &[])?;
    Ok(Json(
        service
            .invoices_by_subscription(api_key, &subscription_ids)
            .await?,
    ))
}

pub async fn get_invoice_by_charge(
    Extension(service): Extension<RecordsService>,
    Query(query): Query<RecordsQuery>,
) -> AppResult<Json<RecordBatch>> {
    let api_key = query.api_key()?;
    let charge_ids = parse_seeds(query.ch_ids.as_deref(), "ch_ids", &[])?;
    Ok(Json(service.invoice_by_charge(api_key, &charge_ids).await?))
}

pub async fn get_subscription_details(
    Extension(service): Extension<RecordsService>,
    Query(query): Query<RecordsQuery>,
) -> AppResult<Json<RecordBatch>> {
    let api_key = query.api_key()?;
    let customer_ids = parse_seeds(query.cus_ids.as_deref(), "cus_ids", &[])?;
    Ok(Json(
        service
            .subscription_details(api_key, &customer_ids)
            .await?,
    ))
}
