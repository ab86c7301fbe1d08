use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Object snapshot as returned by the billing provider.
pub type RemoteObject = Map<String, Value>;

/// Single-level record; values are scalars except where
/// [`flatten_one_level`](super::flatten::flatten_one_level) is used.
pub type FlatRecord = Map<String, Value>;

/// Equality filters passed to provider list calls.
pub type ListFilter = BTreeMap<String, String>;

/// key: billing-semantic-type -> id naming,provider resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemanticType {
    Customer,
    Subscription,
    SubscriptionItem,
    Invoice,
    Charge,
    Product,
    Price,
    Plan,
}

impl SemanticType {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::Customer => "customer",
            SemanticType::Subscription => "subscription",
            SemanticType::SubscriptionItem => "subscription_item",
            SemanticType::Invoice => "invoice",
            SemanticType::Charge => "charge",
            SemanticType::Product => "product",
            SemanticType::Price => "price",
            SemanticType::Plan => "plan",
        }
    }

    /// Field name the provider `id` is moved to before flattening.
    pub fn id_field(self) -> &'static str {
        match self {
            SemanticType::Customer => "cus_id",
            SemanticType::Subscription => "sub_id",
            SemanticType::SubscriptionItem => "si_id",
            SemanticType::Invoice => "inv_id",
            SemanticType::Charge => "ch_id",
            SemanticType::Product => "prod_id",
            SemanticType::Price => "price_id",
            SemanticType::Plan => "plan_id",
        }
    }

    /// REST collection path segment on the provider side.
    pub fn resource_path(self) -> &'static str {
        match self {
            SemanticType::Customer => "customers",
            SemanticType::Subscription => "subscriptions",
            SemanticType::SubscriptionItem => "subscription_items",
            SemanticType::Invoice => "invoices",
            SemanticType::Charge => "charges",
            SemanticType::Product => "products",
            SemanticType::Price => "prices",
            SemanticType::Plan => "plans",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Moves `id` to the type-qualified field. Objects without `id` pass through.
pub fn rename_id(mut object: RemoteObject, kind: SemanticType) -> RemoteObject {
    if let Some(id) = object.remove("id") {
        object.insert(kind.id_field().to_string(), id);
    }
    object
}

/// Builds a single-entry filter, the common case for provider list calls.
pub fn filter_by(field: &str, value: &str) -> ListFilter {
    let mut filter = ListFilter::new();
    filter.insert(field.to_string(), value.to_string());
    filter
}

/// key: billing-batch -> records envelope returned to callers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordBatch {
    pub records: Vec<FlatRecord>,
}

impl RecordBatch {
    pub fn new(records: Vec<FlatRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
