#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use billing_records::billing::{
    BillingProviderAdapter, ListFilter, ListPage, ProviderError, RecordsService, RemoteObject,
    SemanticType,
};
use serde_json::{json, Value};

pub const API_KEY: &str = "sk_test_fixture";

pub fn object(value: Value) -> RemoteObject {
    value.as_object().cloned().expect("fixture must be an object")
}

/// In-memory provider keyed by object id and by single-field list filters.
#[derive(Default)]
pub struct FixtureProvider {
    objects: HashMap<(SemanticType, String), RemoteObject>,
    listings: HashMap<(SemanticType, String, String), Vec<RemoteObject>>,
    upcoming: HashMap<String, RemoteObject>,
    failing: HashSet<String>,
    page_size: usize,
    calls: Mutex<Vec<String>>,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, kind: SemanticType, value: Value) -> Self {
        let object = object(value);
        let id = object["id"].as_str().expect("fixture id").to_string();
        self.objects.insert((kind, id), object);
        self
    }

    pub fn with_listing(
        mut self,
        kind: SemanticType,
        field: &str,
        value: &str,
        objects: Vec<Value>,
    ) -> Self {
        self.listings.insert(
            (kind, field.to_string(), value.to_string()),
            objects.into_iter().map(object).collect(),
        );
        self
    }

    pub fn with_upcoming(mut self, subscription_id: &str, value: Value) -> Self {
        self.upcoming
            .insert(subscription_id.to_string(), object(value));
        self
    }

    /// Any retrieve, list filter value or preview naming `id` is rejected.
    pub fn failing_on(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn into_service(self) -> (RecordsService, Arc<FixtureProvider>) {
        let provider = Arc::new(self);
        (RecordsService::new(provider.clone()), provider)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn rejected(&self, id: &str) -> ProviderError {
        ProviderError::api(
            400,
            Some("invalid_request_error"),
            format!("request for '{id}' rejected"),
        )
    }
}

#[async_trait]
impl BillingProviderAdapter for FixtureProvider {
    async fn retrieve(
        &self,
        api_key: &str,
        kind: SemanticType,
        id: &str,
    ) -> Result<RemoteObject, ProviderError> {
        assert_eq!(api_key, API_KEY);
        self.record(format!("retrieve {kind} {id}"));
        if self.failing.contains(id) {
            return Err(self.rejected(id));
        }
        self.objects
            .get(&(kind, id.to_string()))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(kind, id))
    }

    async fn list_page(
        &self,
        api_key: &str,
        kind: SemanticType,
        filter: &ListFilter,
        starting_after: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        assert_eq!(api_key, API_KEY);
        let (field, value) = filter.iter().next().expect("fixture lists need a filter");
        self.record(format!(
            "list {kind} {field}={value} after={}",
            starting_after.unwrap_or("-")
        ));
        if self.failing.contains(value) {
            return Err(self.rejected(value));
        }
        let all = self
            .listings
            .get(&(kind, field.clone(), value.clone()))
            .cloned()
            .unwrap_or_default();
        let start = match starting_after {
            Some(cursor) => all
                .iter()
                .position(|object| object["id"] == json!(cursor))
                .map(|index| index + 1)
                .unwrap_or(all.len()),
            None => 0,
        };
        let size = if self.page_size == 0 { 100 } else { self.page_size };
        let end = (start + size).min(all.len());
        Ok(ListPage {
            data: all[start..end].to_vec(),
            has_more: end < all.len(),
        })
    }

    async fn upcoming_invoice(
        &self,
        api_key: &str,
        subscription_id: &str,
    ) -> Result<Option<RemoteObject>, ProviderError> {
        assert_eq!(api_key, API_KEY);
        self.record(format!("upcoming {subscription_id}"));
        if self.failing.contains(&format!("upcoming:{subscription_id}")) {
            return Err(ProviderError::api(500, Some("api_error"), "preview unavailable"));
        }
        Ok(self.upcoming.get(subscription_id).cloned())
    }
}

pub fn seeds(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub fn price(id: &str, product: &str, unit_amount: Value) -> Value {
    json!({
        "id": id,
        "object": "price",
        "nickname": "Monthly",
        "currency": "jpy",
        "unit_amount": unit_amount,
        "product": product,
        "recurring": {"interval": "month", "interval_count": 1},
    })
}

pub fn item(id: &str, price: Value, quantity: Value) -> Value {
    json!({
        "id": id,
        "object": "subscription_item",
        "created": 0,
        "price": price,
        "quantity": quantity,
    })
}

pub fn subscription(id: &str, customer: &str, items: Vec<Value>) -> Value {
    json!({
        "id": id,
        "object": "subscription",
        "customer": customer,
        "status": "active",
        "created": 0,
        "current_period_start": 86_400,
        "trial_end": null,
        "items": {"object": "list", "data": items, "has_more": false},
        "metadata": {"plan": "standard"},
    })
}

pub fn product(id: &str, name: &str) -> Value {
    json!({"id": id, "object": "product", "name": name, "active": true})
}

pub fn invoice(id: &str, subscription: &str, total: i64) -> Value {
    json!({
        "id": id,
        "object": "invoice",
        "subscription": subscription,
        "status": "paid",
        "amount_due": total,
        "amount_paid": total,
        "total": total,
        "currency": "jpy",
        "created": 0,
        "lines": {"object": "list", "data": [{"id": "il_1", "amount": total}]},
    })
}

pub fn charge(id: &str, invoice: Value) -> Value {
    json!({
        "id": id,
        "object": "charge",
        "amount": 2200,
        "invoice": invoice,
        "created": 0,
        "outcome": {"type": "authorized"},
    })
}
