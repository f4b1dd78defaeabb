pub mod pull;
pub mod push;

use std::time::SystemTime;

/// A queued fetch request: object id, source URL, acquisition id, optional
/// base URLs for the session, and an optional deadline.
#[derive(Debug, Clone)]
pub struct IngestItem {
    pub object_id: String,
    pub url: String,
    pub acquisition_id: String,
    pub obj_ingest_base_url: Option<String>,
    pub obj_distribution_base_url: Option<String>,
    pub deadline: Option<SystemTime>,
}

impl IngestItem {
    pub fn new(object_id: impl Into<String>, url: impl Into<String>, acquisition_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            url: url.into(),
            acquisition_id: acquisition_id.into(),
            obj_ingest_base_url: None,
            obj_distribution_base_url: None,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: SystemTime) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Has-deadline-first, then ascending deadline — identical policy to
/// [`crate::packager::PackageItem`]'s ordering.
pub(crate) fn sort_by_policy(items: &mut Vec<IngestItem>) {
    items.sort_by(|a, b| match (a.deadline, b.deadline) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn deadline_items_sort_first() {
        let mut items = vec![
            IngestItem::new("a", "http://x/a", "a"),
            IngestItem::new("b", "http://x/b", "b").with_deadline(SystemTime::now() + Duration::from_secs(5)),
        ];
        sort_by_policy(&mut items);
        assert_eq!(items[0].object_id, "b");
    }
}
