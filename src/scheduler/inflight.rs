use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::storage::FeedId;

pub(crate) type InFlightSet = Arc<Mutex<HashSet<FeedId>>>;

/// Marks a feed as being fetched; the mark is removed when the guard drops,
/// including when the fetch task panics.
pub(crate) struct InFlightGuard {
    feed_id: FeedId,
    in_flight: InFlightSet,
}

impl InFlightGuard {
    /// `None` if another worker is already fetching `feed_id`.
    pub(crate) fn acquire(in_flight: &InFlightSet, feed_id: FeedId) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(feed_id) {
            return None;
        }
        Some(Self {
            feed_id,
            in_flight: Arc::clone(in_flight),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        set.remove(&self.feed_id);
    }
}
