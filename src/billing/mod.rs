pub mod adapters;
pub mod api;
pub mod flatten;
pub mod models;
pub mod paginate;
pub mod service;

pub use adapters::{BillingProviderAdapter, ListPage, ProviderError, StripeAdapter};
pub use api::{
    get_charges, get_invoice_by_charge, get_invoices, get_subscription_details,
    get_subscription_items, get_subscriptions, search_customers, search_subscriptions,
    RecordsQuery,
};
pub use flatten::{flatten_full, flatten_one_level, localize_epoch};
pub use models::{
    filter_by, rename_id, FlatRecord, ListFilter, RecordBatch, RemoteObject, SemanticType,
};
pub use paginate::{collect_all, list_all};
pub use service::{monthly_totals, MonthlyTotals, RecordsError, RecordsService, TotalsError};
