//! Page-by-page listing of a leader range.

use mdsync_net::{MetadataService, NetError};
use mdsync_types::Item;

use crate::merge::RangeQuery;

/// Paginator over the leader items of a [`RangeQuery`].
///
/// The first page starts after the query marker, each following page after
/// the last key of the previous one. The server may cap pages below the
/// requested size, so only an empty page, or a page reaching the range's
/// upper bound, ends the listing.
pub struct RangeListing<'a> {
    service: &'a dyn MetadataService,
    query: &'a RangeQuery,
    page_size: usize,
    after: Option<String>,
    done: bool,
}

impl<'a> RangeListing<'a> {
    /// Prepare the listing; nothing is requested until the first page.
    pub fn new(service: &'a dyn MetadataService, query: &'a RangeQuery, page_size: usize) -> Self {
        Self {
            service,
            query,
            page_size: page_size.max(1),
            after: query.marker.clone(),
            done: false,
        }
    }

    /// Fetch the next non-empty page, `None` once the range is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Item>>, NetError> {
        if self.done {
            return Ok(None);
        }
        let page = self
            .service
            .list_range(
                &self.query.bucket,
                self.after.as_deref(),
                self.query.last_key.as_deref(),
                self.page_size,
            )
            .await?;

        let Some(last) = page.last().and_then(Item::object_key).map(str::to_string) else {
            self.done = true;
            return Ok(None);
        };
        if self.query.last_key.as_deref() == Some(last.as_str()) {
            self.done = true;
        }
        self.after = Some(last);
        Ok(Some(page))
    }
}
