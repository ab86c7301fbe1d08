use axum::{routing::get, Router};

use crate::billing;

pub fn api_routes() -> Router {
    Router::new()
        .route("/search_customers", get(billing::search_customers))
        .route("/search_subscriptions", get(billing::search_subscriptions))
        .route("/subscriptions", get(billing::get_subscriptions))
        .route("/subscription_items", get(billing::get_subscription_items))
        .route("/charges", get(billing::get_charges))
        .route("/invoices", get(billing::get_invoices))
        .route("/invoice_by_charge", get(billing::get_invoice_by_charge))
        .route(
            "/subscription_details",
            get(billing::get_subscription_details),
        )
}
