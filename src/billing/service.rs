use std::sync::Arc;

use futures_util::TryStreamExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::adapters::{BillingProviderAdapter, ProviderError, UPCOMING_NONE_CODE};
use super::flatten::{flatten_full, flatten_one_level, localize_epoch};
use super::models::{filter_by, rename_id, FlatRecord, RecordBatch, RemoteObject, SemanticType};
use super::paginate::{collect_all, list_all};

const INVOICE_PROJECTION: [&str; 5] = ["status", "amount_due", "amount_paid", "total", "currency"];
const PREVIEW_PROJECTION: [&str; 6] = [
    "amount_due",
    "subtotal",
    "total",
    "currency",
    "period_start",
    "period_end",
];

/// Failure of a whole batch, tagged with the seed that caused it.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("billing provider error for {seed}: {source}")]
    Provider {
        seed: String,
        #[source]
        source: ProviderError,
    },
    #[error("unexpected error for {seed}: {reason}")]
    Unexpected { seed: String, reason: String },
}

impl RecordsError {
    pub fn seed(&self) -> &str {
        match self {
            RecordsError::Provider { seed, .. } | RecordsError::Unexpected { seed, .. } => seed,
        }
    }
}

#[derive(Debug, Error)]
enum HopError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("{0}")]
    Malformed(String),
}

impl HopError {
    fn at_seed(self, seed: &str) -> RecordsError {
        let seed = seed.to_string();
        match self {
            HopError::Provider(ProviderError::Decode(err)) => RecordsError::Unexpected {
                seed,
                reason: format!("malformed provider payload: {err}"),
            },
            HopError::Provider(source) => RecordsError::Provider { seed, source },
            HopError::Malformed(reason) => RecordsError::Unexpected { seed, reason },
        }
    }
}

type HopResult<T> = Result<T, HopError>;

#[derive(Debug, Error, PartialEq)]
pub enum TotalsError {
    #[error("unit amount {0} is not an integer")]
    NonIntegerAmount(Value),
    #[error("monthly total overflowed")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthlyTotals {
    pub total: i64,
    pub tax: i64,
    pub grand_total: i64,
}

/// Sums `price_unit_amount * quantity` over items carrying both, with tax at
/// the floor of 10 %. Items whose quantity is not an integer are skipped.
///
/// Unit amounts are minor currency units; a whole-valued float such as
/// `1000.0` counts, a fractional one cannot be billed and fails the totals.
pub fn monthly_totals(items: &[RemoteObject]) -> Result<MonthlyTotals, TotalsError> {
    let mut total: i64 = 0;
    for item in items {
        let unit_amount = item.get("price_unit_amount").filter(|value| !value.is_null());
        let quantity = item.get("quantity").and_then(Value::as_i64);
        let (Some(unit_amount), Some(quantity)) = (unit_amount, quantity) else {
            continue;
        };
        let unit_amount = minor_units(unit_amount)
            .ok_or_else(|| TotalsError::NonIntegerAmount(unit_amount.clone()))?;
        let line = unit_amount
            .checked_mul(quantity)
            .ok_or(TotalsError::Overflow)?;
        total = total.checked_add(line).ok_or(TotalsError::Overflow)?;
    }
    let tax = total.div_euclid(10);
    let grand_total = total.checked_add(tax).ok_or(TotalsError::Overflow)?;
    Ok(MonthlyTotals {
        total,
        tax,
        grand_total,
    })
}

fn minor_units(amount: &Value) -> Option<i64> {
    if let Some(amount) = amount.as_i64() {
        return Some(amount);
    }
    let amount = amount.as_f64()?;
    let whole = amount.fract() == 0.0 && amount >= i64::MIN as f64 && amount < i64::MAX as f64;
    whole.then_some(amount as i64)
}

/// Accumulates records for one batch. Dropping it on error discards
/// everything gathered for earlier seeds.
struct BatchRun {
    op: &'static str,
    batch_id: Uuid,
    records: Vec<FlatRecord>,
}

impl BatchRun {
    fn start(op: &'static str, seeds: &[String]) -> Self {
        let batch_id = Uuid::new_v4();
        info!(%batch_id, op, seeds = seeds.len(), "billing batch started");
        Self {
            op,
            batch_id,
            records: Vec::new(),
        }
    }

    fn accept(
        &mut self,
        seed: &str,
        outcome: HopResult<Vec<FlatRecord>>,
    ) -> Result<(), RecordsError> {
        match outcome {
            Ok(records) => {
                debug!(batch_id = %self.batch_id, %seed, records = records.len(), "seed resolved");
                self.records.extend(records);
                Ok(())
            }
            Err(err) => {
                let err = err.at_seed(seed);
                error!(
                    batch_id = %self.batch_id,
                    op = self.op,
                    %seed,
                    discarded = self.records.len(),
                    error = %err,
                    "billing batch aborted",
                );
                Err(err)
            }
        }
    }

    fn finish(self) -> RecordBatch {
        info!(
            batch_id = %self.batch_id,
            op = self.op,
            records = self.records.len(),
            "billing batch completed"
        );
        RecordBatch::new(self.records)
    }
}

/// key: billing-service -> record aggregation over the provider graph
#[derive(Clone)]
pub struct RecordsService {
    provider: Arc<dyn BillingProviderAdapter>,
}

impl RecordsService {
    pub fn new(provider: Arc<dyn BillingProviderAdapter>) -> Self {
        Self { provider }
    }

    fn provider(&self) -> &dyn BillingProviderAdapter {
        self.provider.as_ref()
    }

    pub async fn customers_by_email(
        &self,
        api_key: &str,
        emails: &[String],
    ) -> Result<RecordBatch, RecordsError> {
        let mut run = BatchRun::start("customers_by_email", emails);
        for email in emails {
            let outcome = self.customers_for_email(api_key, email).await;
            run.accept(email, outcome)?;
        }
        Ok(run.finish())
    }

    pub async fn subscriptions_by_customer(
        &self,
        api_key: &str,
        customer_ids: &[String],
    ) -> Result<RecordBatch, RecordsError> {
        let mut run = BatchRun::start("subscriptions_by_customer", customer_ids);
        for customer_id in customer_ids {
            let outcome = self.subscriptions_for_customer(api_key, customer_id).await;
            run.accept(customer_id, outcome)?;
        }
        Ok(run.finish())
    }

    pub async fn subscriptions_by_id(
        &self,
        api_key: &str,
        subscription_ids: &[String],
    ) -> Result<RecordBatch, RecordsError> {
        let mut run = BatchRun::start("subscriptions_by_id", subscription_ids);
        for subscription_id in subscription_ids {
            let outcome = self
                .provider()
                .retrieve(api_key, SemanticType::Subscription, subscription_id)
                .await
                .map(|subscription| vec![flat(subscription, SemanticType::Subscription)])
                .map_err(HopError::from);
            run.accept(subscription_id, outcome)?;
        }
        Ok(run.finish())
    }

    pub async fn subscription_items(
        &self,
        api_key: &str,
        subscription_ids: &[String],
    ) -> Result<RecordBatch, RecordsError> {
        let mut run = BatchRun::start("subscription_items", subscription_ids);
        for subscription_id in subscription_ids {
            let outcome = self.items_for_subscription(api_key, subscription_id).await;
            run.accept(subscription_id, outcome)?;
        }
        Ok(run.finish())
    }

    pub async fn charges_by_subscription(
        &self,
        api_key: &str,
        subscription_ids: &[String],
    ) -> Result<RecordBatch, RecordsError> {
        let mut run = BatchRun::start("charges_by_subscription", subscription_ids);
        for subscription_id in subscription_ids {
            let outcome = self.charges_for_subscription(api_key, subscription_id).await;
            run.accept(subscription_id, outcome)?;
        }
        Ok(run.finish())
    }

    pub async fn invoices_by_subscription(
        &self,
        api_key: &str,
        subscription_ids: &[String],
    ) -> Result<RecordBatch, RecordsError> {
        let mut run = BatchRun::start("invoices_by_subscription", subscription_ids);
        for subscription_id in subscription_ids {
            let outcome = collect_all(
                self.provider(),
                api_key,
                SemanticType::Invoice,
                filter_by("subscription", subscription_id),
            )
            .await
            .map(|invoices| flat_all(invoices, SemanticType::Invoice))
            .map_err(HopError::from);
            run.accept(subscription_id, outcome)?;
        }
        Ok(run.finish())
    }

    pub async fn invoice_by_charge(
        &self,
        api_key: &str,
        charge_ids: &[String],
    ) -> Result<RecordBatch, RecordsError> {
        let mut run = BatchRun::start("invoice_by_charge", charge_ids);
        for charge_id in charge_ids {
            let outcome = self.invoice_for_charge(api_key, charge_id).await;
            run.accept(charge_id, outcome)?;
        }
        Ok(run.finish())
    }

    pub async fn subscription_details(
        &self,
        api_key: &str,
        customer_ids: &[String],
    ) -> Result<RecordBatch, RecordsError> {
        let mut run = BatchRun::start("subscription_details", customer_ids);
        for customer_id in customer_ids {
            let outcome = self.details_for_customer(api_key, customer_id).await;
            run.accept(customer_id, outcome)?;
        }
        Ok(run.finish())
    }

    async fn customers_for_email(
        &self,
        api_key: &str,
        email: &str,
    ) -> HopResult<Vec<FlatRecord>> {
        let customers = collect_all(
            self.provider(),
            api_key,
            SemanticType::Customer,
            filter_by("email", email),
        )
        .await?;
        Ok(flat_all(customers, SemanticType::Customer))
    }

    async fn subscriptions_for_customer(
        &self,
        api_key: &str,
        customer_id: &str,
    ) -> HopResult<Vec<FlatRecord>> {
        let subscriptions = collect_all(
            self.provider(),
            api_key,
            SemanticType::Subscription,
            filter_by("customer", customer_id),
        )
        .await?;

        let mut records = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            let mut names = Vec::new();
            for item in self.line_items(api_key, &subscription).await? {
                let price = self.item_price(api_key, &item).await?;
                let product = self.price_product(api_key, &price).await?;
                let name = string_field(&product, "name");
                if !name.is_empty() {
                    names.push(name);
                }
            }
            let mut subscription = rename_id(subscription, SemanticType::Subscription);
            subscription.insert(
                "subscription_item_names".to_string(),
                Value::String(names.join(" ")),
            );
            records.push(flatten_full(&subscription));
        }
        Ok(records)
    }

    async fn items_for_subscription(
        &self,
        api_key: &str,
        subscription_id: &str,
    ) -> HopResult<Vec<FlatRecord>> {
        let subscription = self
            .provider()
            .retrieve(api_key, SemanticType::Subscription, subscription_id)
            .await?;
        let items = self.line_items(api_key, &subscription).await?;
        let subscription = rename_id(subscription, SemanticType::Subscription);
        let parent_id = field_or_null(&subscription, SemanticType::Subscription.id_field());

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let price = self.item_price(api_key, &item).await?;
            let product = self.price_product(api_key, &price).await?;
            let mut item = rename_id(item, SemanticType::SubscriptionItem);
            item.insert(
                SemanticType::Subscription.id_field().to_string(),
                parent_id.clone(),
            );
            for (key, value) in flatten_full(&rename_id(product, SemanticType::Product)) {
                item.insert(format!("product_{key}"), value);
            }
            records.push(flatten_one_level(&item));
        }
        Ok(records)
    }

    async fn charges_for_subscription(
        &self,
        api_key: &str,
        subscription_id: &str,
    ) -> HopResult<Vec<FlatRecord>> {
        let mut invoices = list_all(
            self.provider(),
            api_key,
            SemanticType::Invoice,
            filter_by("subscription", subscription_id),
        );
        let mut records = Vec::new();
        while let Some(invoice) = invoices.try_next().await? {
            let invoice_id = object_id(&invoice, SemanticType::Invoice)?;
            let charges = collect_all(
                self.provider(),
                api_key,
                SemanticType::Charge,
                filter_by("invoice", invoice_id),
            )
            .await?;
            records.extend(flat_all(charges, SemanticType::Charge));
        }
        Ok(records)
    }

    async fn invoice_for_charge(
        &self,
        api_key: &str,
        charge_id: &str,
    ) -> HopResult<Vec<FlatRecord>> {
        let charge = self
            .provider()
            .retrieve(api_key, SemanticType::Charge, charge_id)
            .await?;
        let invoice_id = match charge.get("invoice") {
            None | Some(Value::Null) => {
                debug!(%charge_id, "charge has no invoice");
                return Ok(Vec::new());
            }
            Some(Value::String(id)) => id.clone(),
            Some(Value::Object(invoice)) => object_id(invoice, SemanticType::Invoice)?.to_string(),
            Some(other) => {
                return Err(HopError::Malformed(format!(
                    "charge {charge_id} has an invalid invoice reference: {other}"
                )))
            }
        };
        let invoice = self
            .provider()
            .retrieve(api_key, SemanticType::Invoice, &invoice_id)
            .await?;
        Ok(vec![flat(invoice, SemanticType::Invoice)])
    }

    async fn details_for_customer(
        &self,
        api_key: &str,
        customer_id: &str,
    ) -> HopResult<Vec<FlatRecord>> {
        let subscriptions = collect_all(
            self.provider(),
            api_key,
            SemanticType::Subscription,
            filter_by("customer", customer_id),
        )
        .await?;

        let mut records = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            records.push(self.subscription_detail(api_key, subscription).await?);
        }
        Ok(records)
    }

    async fn subscription_detail(
        &self,
        api_key: &str,
        subscription: RemoteObject,
    ) -> HopResult<FlatRecord> {
        let subscription_id = object_id(&subscription, SemanticType::Subscription)?.to_string();

        let mut items = Vec::new();
        for item in self.line_items(api_key, &subscription).await? {
            items.push(self.priced_item(api_key, item).await?);
        }

        let preview = match self
            .provider()
            .upcoming_invoice(api_key, &subscription_id)
            .await
        {
            Ok(Some(invoice)) => Value::Object(project(&invoice, &PREVIEW_PROJECTION)),
            Ok(None) => Value::Null,
            Err(err) if err.code() == Some(UPCOMING_NONE_CODE) => Value::Null,
            Err(err) => return Err(err.into()),
        };
        if preview.is_null() {
            debug!(subscription = %subscription_id, "no upcoming invoice");
        }

        let invoices = collect_all(
            self.provider(),
            api_key,
            SemanticType::Invoice,
            filter_by("subscription", &subscription_id),
        )
        .await?;
        let history = invoices
            .iter()
            .map(|invoice| Value::Object(invoice_summary(invoice)))
            .collect();

        let totals = monthly_totals(&items);
        let mut record = rename_id(subscription, SemanticType::Subscription);
        record.insert(
            "items".to_string(),
            Value::Array(items.into_iter().map(Value::Object).collect()),
        );
        record.insert("next_invoice_preview".to_string(), preview);
        record.insert("invoices".to_string(), Value::Array(history));
        let (total, tax, grand_total) = match totals {
            Ok(totals) => (
                Value::from(totals.total),
                Value::from(totals.tax),
                Value::from(totals.grand_total),
            ),
            Err(err) => {
                warn!(subscription = %subscription_id, error = %err, "monthly totals unavailable");
                (Value::Null, Value::Null, Value::Null)
            }
        };
        record.insert("calculated_monthly_total".to_string(), total);
        record.insert("calculated_monthly_tax".to_string(), tax);
        record.insert("calculated_monthly_grand_total".to_string(), grand_total);
        Ok(flatten_full(&record))
    }

    /// Renames the item and attaches its product name and price details as
    /// plain fields.
    async fn priced_item(&self, api_key: &str, item: RemoteObject) -> HopResult<RemoteObject> {
        let price = self.item_price(api_key, &item).await?;
        let product = self.price_product(api_key, &price).await?;
        let mut item = rename_id(item, SemanticType::SubscriptionItem);
        item.insert("product_name".to_string(), field_or_null(&product, "name"));
        item.insert("price_nickname".to_string(), field_or_null(&price, "nickname"));
        item.insert(
            "price_unit_amount".to_string(),
            field_or_null(&price, "unit_amount"),
        );
        item.insert("price_currency".to_string(), field_or_null(&price, "currency"));
        Ok(item)
    }

    /// Line items embedded in the subscription, or the full listing when the
    /// embedded page is truncated.
    async fn line_items(
        &self,
        api_key: &str,
        subscription: &RemoteObject,
    ) -> HopResult<Vec<RemoteObject>> {
        let items = match subscription.get("items") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Object(items)) => items,
            Some(other) => {
                return Err(HopError::Malformed(format!(
                    "subscription items is not a list object: {other}"
                )))
            }
        };

        if items.get("has_more").and_then(Value::as_bool).unwrap_or(false) {
            let subscription_id = object_id(subscription, SemanticType::Subscription)?;
            return Ok(collect_all(
                self.provider(),
                api_key,
                SemanticType::SubscriptionItem,
                filter_by("subscription", subscription_id),
            )
            .await?);
        }

        match items.get("data") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(data)) => data
                .iter()
                .map(|item| {
                    item.as_object().cloned().ok_or_else(|| {
                        HopError::Malformed(format!("subscription item is not an object: {item}"))
                    })
                })
                .collect(),
            Some(other) => Err(HopError::Malformed(format!(
                "subscription item data is not a list: {other}"
            ))),
        }
    }

    async fn item_price(&self, api_key: &str, item: &RemoteObject) -> HopResult<RemoteObject> {
        self.resolve(api_key, item, "price", SemanticType::Price).await
    }

    async fn price_product(
        &self,
        api_key: &str,
        price: &RemoteObject,
    ) -> HopResult<RemoteObject> {
        self.resolve(api_key, price, "product", SemanticType::Product)
            .await
    }

    /// Follows a cross-reference that is either an embedded object or an id.
    async fn resolve(
        &self,
        api_key: &str,
        owner: &RemoteObject,
        field: &str,
        kind: SemanticType,
    ) -> HopResult<RemoteObject> {
        match owner.get(field) {
            Some(Value::Object(embedded)) => Ok(embedded.clone()),
            Some(Value::String(id)) => Ok(self.provider().retrieve(api_key, kind, id).await?),
            other => Err(HopError::Malformed(format!(
                "{} has no usable {field} reference: {}",
                owner
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("object"),
                other.unwrap_or(&Value::Null),
            ))),
        }
    }
}

fn flat(object: RemoteObject, kind: SemanticType) -> FlatRecord {
    flatten_full(&rename_id(object, kind))
}

fn flat_all(objects: Vec<RemoteObject>, kind: SemanticType) -> Vec<FlatRecord> {
    objects.into_iter().map(|object| flat(object, kind)).collect()
}

fn object_id(object: &RemoteObject, kind: SemanticType) -> HopResult<&str> {
    object
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| HopError::Malformed(format!("{kind} without an id")))
}

fn field_or_null(object: &RemoteObject, field: &str) -> Value {
    object.get(field).cloned().unwrap_or(Value::Null)
}

fn string_field(object: &RemoteObject, field: &str) -> String {
    object
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn project(object: &RemoteObject, fields: &[&str]) -> RemoteObject {
    fields
        .iter()
        .map(|field| (field.to_string(), field_or_null(object, field)))
        .collect()
}

/// Invoice history entry; `created` is localized here because nested keys
/// are not localized by the flattener.
fn invoice_summary(invoice: &RemoteObject) -> RemoteObject {
    let mut summary = RemoteObject::new();
    summary.insert(
        SemanticType::Invoice.id_field().to_string(),
        field_or_null(invoice, "id"),
    );
    summary.extend(project(invoice, &INVOICE_PROJECTION));
    let created = invoice
        .get("created")
        .and_then(Value::as_i64)
        .and_then(localize_epoch)
        .map(Value::String)
        .unwrap_or_else(|| field_or_null(invoice, "created"));
    summary.insert("created".to_string(), created);
    summary
}
