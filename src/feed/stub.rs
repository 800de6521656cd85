//! Scripted in-memory feed used by the pipeline tests.

use super::FeedSource;
use crate::error::FetchError;
use crate::models::{Category, ItemId, ItemPayload, RawItem};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A page response: items, or the HTTP status the feed failed with.
pub type Scripted = Result<Vec<RawItem>, u16>;

#[derive(Debug, Default)]
pub struct ScriptedFeed {
    list_pages: Mutex<VecDeque<Scripted>>,
    flash_pages: Mutex<VecDeque<Scripted>>,
    /// Served forever once the scripted list pages run out.
    repeat_list: Option<Vec<RawItem>>,
    details: HashMap<String, RawItem>,
    failing_details: HashSet<String>,
    detail_delay: Duration,
    categories: Option<Vec<Category>>,
    pub list_calls: Mutex<Vec<(i64, Option<ItemId>)>>,
    pub flash_calls: Mutex<Vec<Option<ItemId>>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list_pages(mut self, pages: Vec<Scripted>) -> Self {
        self.list_pages = Mutex::new(pages.into());
        self
    }

    pub fn with_flash_pages(mut self, pages: Vec<Scripted>) -> Self {
        self.flash_pages = Mutex::new(pages.into());
        self
    }

    pub fn repeating_list(mut self, page: Vec<RawItem>) -> Self {
        self.repeat_list = Some(page);
        self
    }

    pub fn with_detail(mut self, detail: RawItem) -> Self {
        let id = detail.id.clone().expect("detail fixtures need an id");
        self.details.insert(id.0, detail);
        self
    }

    pub fn with_failing_detail(mut self, id: &str) -> Self {
        self.failing_details.insert(id.to_string());
        self
    }

    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }

    pub fn with_categories(mut self, categories: Vec<Category>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.lock().unwrap().len()
    }

    pub fn flash_call_count(&self) -> usize {
        self.flash_calls.lock().unwrap().len()
    }
}

fn scripted_error(endpoint: &str, status: u16) -> FetchError {
    FetchError::Status {
        url: format!("stub://{endpoint}"),
        status,
    }
}

impl FeedSource for ScriptedFeed {
    async fn fetch_list(
        &self,
        offset: i64,
        category: Option<&ItemId>,
    ) -> Result<Vec<RawItem>, FetchError> {
        self.list_calls
            .lock()
            .unwrap()
            .push((offset, category.cloned()));
        let next = self.list_pages.lock().unwrap().pop_front();
        match next {
            Some(page) => page.map_err(|status| scripted_error("list", status)),
            None => Ok(self.repeat_list.clone().unwrap_or_default()),
        }
    }

    async fn fetch_detail(&self, id: &ItemId) -> Result<RawItem, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_details.contains(&id.0) {
            return Err(scripted_error("detail", 500));
        }
        self.details.get(&id.0).cloned().ok_or(FetchError::Malformed {
            url: "stub://detail".to_string(),
            reason: format!("no detail for {id}"),
        })
    }

    async fn fetch_flash(
        &self,
        _limit: u32,
        last_id: Option<&ItemId>,
    ) -> Result<Vec<RawItem>, FetchError> {
        self.flash_calls.lock().unwrap().push(last_id.cloned());
        let next = self.flash_pages.lock().unwrap().pop_front();
        match next {
            Some(page) => page.map_err(|status| scripted_error("flash", status)),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_categories(&self) -> Result<Vec<Category>, FetchError> {
        self.categories
            .clone()
            .ok_or_else(|| scripted_error("category", 503))
    }
}

/// A list item with an id and the offset the feed reports for it.
pub fn list_item(id: i64, offset: i64) -> RawItem {
    RawItem {
        id: Some(ItemId(id.to_string())),
        offset: Some(offset),
        title: Some(format!("Headline {id}")),
        introduction: Some(format!("Introduction {id}")),
        publish_time: Some("2025-11-28T06:00:00.000Z".to_string()),
        ..Default::default()
    }
}

/// A detail payload with HTML content and a publish time.
pub fn detail_item(id: i64, title: &str, html: &str, publish_time: &str) -> RawItem {
    RawItem {
        id: Some(ItemId(id.to_string())),
        title: Some(title.to_string()),
        content: Some(html.to_string()),
        publish_time: Some(publish_time.to_string()),
        ..Default::default()
    }
}

/// A flash item published at `time`.
pub fn flash_item(id: &str, time: &str, important: i64) -> RawItem {
    RawItem {
        id: Some(ItemId(id.to_string())),
        time: Some(time.to_string()),
        important: Some(important),
        data: Some(ItemPayload {
            title: Some(format!("Flash {id}")),
            content: Some(format!("<p>Body of flash {id}</p>")),
        }),
        ..Default::default()
    }
}

pub fn category(id: i64, name: &str) -> Category {
    Category {
        id: ItemId(id.to_string()),
        name: name.to_string(),
    }
}
