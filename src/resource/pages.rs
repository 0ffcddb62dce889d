//! Forward-only iteration over `next`-linked pages.

use std::time::Duration;

use crate::error::Result;

use super::Resource;

/// Yields the starting resource, then fetches and yields each `next` page.
///
/// Stops after the first page without a `next` link, or after yielding an
/// error. There is no page limit: a server that always answers with a
/// `next` link (the `events` feed does exactly that) produces an endless
/// iterator.
#[derive(Debug)]
pub struct Pages {
    first: Option<Resource>,
    current: Option<Resource>,
    timeout: Option<Duration>,
}

impl Pages {
    pub(crate) fn new(start: Resource, timeout: Option<Duration>) -> Self {
        Self {
            first: Some(start),
            current: None,
            timeout,
        }
    }
}

impl Iterator for Pages {
    type Item = Result<Resource>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(first) = self.first.take() {
            self.current = Some(first.clone());
            return Some(Ok(first));
        }

        let current = self.current.take()?;
        let next = match current.next_page() {
            Ok(Some(next)) => next,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = next.refresh_with_timeout(self.timeout) {
            return Some(Err(e));
        }
        self.current = Some(next.clone());
        Some(Ok(next))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::testing::{self, MockBackend, APPBASE};
    use crate::transport::Method;

    #[test]
    fn test_follows_next_links_until_absent() {
        let backend = Arc::new(MockBackend::new());
        backend.on_get(
            &format!("{APPBASE}/search?page=2"),
            testing::json(json!({
                "_links": {"self": {"href": "/search?page=2"}, "next": {"href": "/search?page=3"}},
                "page": 2
            })),
        );
        backend.on_get(
            &format!("{APPBASE}/search?page=3"),
            testing::json(json!({"_links": {"self": {"href": "/search?page=3"}}, "page": 3})),
        );
        let first = backend.resource(json!({
            "_links": {"self": {"href": "/search"}, "next": {"href": "/search?page=2"}},
            "page": 1
        }));

        let pages: Vec<i64> = first
            .pages()
            .map(|page| page.unwrap().get("page").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert_eq!(backend.count(Method::Get, &format!("{APPBASE}/search?page=2")), 1);
    }

    #[test]
    fn test_single_page() {
        let backend = Arc::new(MockBackend::new());
        let only = backend.resource(json!({"_links": {"self": {"href": "/only"}}}));
        assert_eq!(only.pages().count(), 1);
        assert!(backend.requests().is_empty());
    }

    #[test]
    fn test_stops_after_error() {
        let backend = Arc::new(MockBackend::new());
        let first = backend.resource(json!({
            "_links": {"self": {"href": "/a"}, "next": {"href": "/missing"}}
        }));
        let results: Vec<_> = first.pages().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
