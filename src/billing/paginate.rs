use std::collections::VecDeque;

use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;

use super::adapters::{BillingProviderAdapter, ProviderError};
use super::models::{ListFilter, RemoteObject, SemanticType};

#[derive(Default)]
struct PageCursor {
    buffered: VecDeque<RemoteObject>,
    starting_after: Option<String>,
    exhausted: bool,
}

impl PageCursor {
    fn absorb(&mut self, data: Vec<RemoteObject>, has_more: bool) {
        self.starting_after = data
            .last()
            .and_then(|object| object.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        // Without a cursor the next request would repeat this page.
        self.exhausted = !has_more || self.starting_after.is_none();
        self.buffered.extend(data);
    }
}

/// key: billing-paginator -> lazy list over provider pages
///
/// Pages are requested only as the stream is polled. Each call starts again
/// from the first page; the cursor lives inside the returned stream.
pub fn list_all<'a>(
    provider: &'a dyn BillingProviderAdapter,
    api_key: &'a str,
    kind: SemanticType,
    filter: ListFilter,
) -> BoxStream<'a, Result<RemoteObject, ProviderError>> {
    stream::try_unfold(PageCursor::default(), move |cursor| {
        next_object(provider, api_key, kind, filter.clone(), cursor)
    })
    .boxed()
}

async fn next_object(
    provider: &dyn BillingProviderAdapter,
    api_key: &str,
    kind: SemanticType,
    filter: ListFilter,
    mut cursor: PageCursor,
) -> Result<Option<(RemoteObject, PageCursor)>, ProviderError> {
    loop {
        if let Some(object) = cursor.buffered.pop_front() {
            return Ok(Some((object, cursor)));
        }
        if cursor.exhausted {
            return Ok(None);
        }
        let page = provider
            .list_page(api_key, kind, &filter, cursor.starting_after.as_deref())
            .await?;
        cursor.absorb(page.data, page.has_more);
    }
}

/// Drains [`list_all`] into memory, stopping at the first failing page.
pub async fn collect_all(
    provider: &dyn BillingProviderAdapter,
    api_key: &str,
    kind: SemanticType,
    filter: ListFilter,
) -> Result<Vec<RemoteObject>, ProviderError> {
    list_all(provider, api_key, kind, filter).try_collect().await
}
