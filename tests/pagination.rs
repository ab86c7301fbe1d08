// key: pagination-tests -> lazy cursor,restart,mid-stream failure
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use billing_records::billing::{
    collect_all, filter_by, list_all, BillingProviderAdapter, ListFilter, ListPage, ProviderError,
    RemoteObject, SemanticType,
};
use futures_util::StreamExt;
use serde_json::json;

/// Serves fixed pages; the page after the one ending in `starting_after`
/// comes next.
struct PagedProvider {
    pages: Vec<Vec<RemoteObject>>,
    fail_at_page: Option<usize>,
    fetches: AtomicUsize,
}

impl PagedProvider {
    fn new(pages: Vec<Vec<&str>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|ids| {
                ids.into_iter()
                    .map(|id| json!({"id": id}).as_object().cloned().unwrap())
                    .collect()
            })
            .collect();
        Self {
            pages,
            fail_at_page: None,
            fetches: AtomicUsize::new(0),
        }
    }

    fn failing_at(mut self, page: usize) -> Self {
        self.fail_at_page = Some(page);
        self
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingProviderAdapter for PagedProvider {
    async fn retrieve(
        &self,
        _api_key: &str,
        kind: SemanticType,
        id: &str,
    ) -> Result<RemoteObject, ProviderError> {
        Err(ProviderError::not_found(kind, id))
    }

    async fn list_page(
        &self,
        _api_key: &str,
        _kind: SemanticType,
        _filter: &ListFilter,
        starting_after: Option<&str>,
    ) -> Result<ListPage, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let index = match starting_after {
            None => 0,
            Some(cursor) => {
                self.pages
                    .iter()
                    .position(|page| {
                        page.last().and_then(|object| object["id"].as_str()) == Some(cursor)
                    })
                    .expect("cursor must end a served page")
                    + 1
            }
        };
        if self.fail_at_page == Some(index) {
            return Err(ProviderError::api(429, Some("rate_limit"), "slow down"));
        }
        Ok(ListPage {
            data: self.pages[index].clone(),
            has_more: index + 1 < self.pages.len(),
        })
    }

    async fn upcoming_invoice(
        &self,
        _api_key: &str,
        _subscription_id: &str,
    ) -> Result<Option<RemoteObject>, ProviderError> {
        Ok(None)
    }
}

fn ids(objects: &[RemoteObject]) -> Vec<String> {
    objects
        .iter()
        .map(|object| object["id"].as_str().unwrap().to_string())
        .collect()
}

fn three_pages_then_empty() -> PagedProvider {
    PagedProvider::new(vec![
        vec!["cus_1", "cus_2"],
        vec!["cus_3", "cus_4"],
        vec!["cus_5", "cus_6"],
        vec![],
    ])
}

#[tokio::test]
async fn every_page_is_drained_in_order() {
    let provider = three_pages_then_empty();
    let objects = collect_all(
        &provider,
        "sk_test",
        SemanticType::Customer,
        filter_by("email", "a@example.com"),
    )
    .await
    .unwrap();

    assert_eq!(
        ids(&objects),
        vec!["cus_1", "cus_2", "cus_3", "cus_4", "cus_5", "cus_6"]
    );
    assert_eq!(provider.fetches(), 4);
}

#[tokio::test]
async fn a_second_listing_starts_from_the_first_page() {
    let provider = three_pages_then_empty();
    let filter = filter_by("email", "a@example.com");

    let first = collect_all(&provider, "sk_test", SemanticType::Customer, filter.clone())
        .await
        .unwrap();
    let second = collect_all(&provider, "sk_test", SemanticType::Customer, filter)
        .await
        .unwrap();

    assert_eq!(first.len(), 6);
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(provider.fetches(), 8);
}

#[tokio::test]
async fn pages_are_fetched_on_demand() {
    let provider = three_pages_then_empty();
    let mut stream = list_all(
        &provider,
        "sk_test",
        SemanticType::Customer,
        ListFilter::new(),
    );

    assert_eq!(provider.fetches(), 0);
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first["id"], json!("cus_1"));
    assert_eq!(provider.fetches(), 1);
    stream.next().await.unwrap().unwrap();
    assert_eq!(provider.fetches(), 1);
    stream.next().await.unwrap().unwrap();
    assert_eq!(provider.fetches(), 2);
}

#[tokio::test]
async fn later_page_failure_surfaces_mid_iteration() {
    let provider = three_pages_then_empty().failing_at(1);
    let mut stream = list_all(
        &provider,
        "sk_test",
        SemanticType::Invoice,
        ListFilter::new(),
    );

    assert!(stream.next().await.unwrap().is_ok());
    assert!(stream.next().await.unwrap().is_ok());
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Some("rate_limit"));

    let collected = collect_all(
        &provider,
        "sk_test",
        SemanticType::Invoice,
        ListFilter::new(),
    )
    .await;
    assert!(collected.is_err());
}

#[tokio::test]
async fn single_page_without_more_stops_immediately() {
    let provider = PagedProvider::new(vec![vec!["in_1"]]);
    let objects = collect_all(
        &provider,
        "sk_test",
        SemanticType::Invoice,
        ListFilter::new(),
    )
    .await
    .unwrap();
    assert_eq!(ids(&objects), vec!["in_1"]);
    assert_eq!(provider.fetches(), 1);
}
