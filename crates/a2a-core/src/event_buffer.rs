use indexmap::IndexMap;
use std::collections::HashSet;

/// Items that carry a stable identity used for dedup.
pub trait Identified {
    fn identity(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    Filled(usize),
    Skipped,
}

/// Bounded, newest-first collection deduplicated by identity.
///
/// Entries are stored oldest-first in an insertion-ordered map so that the
/// newest entry is always at the back and eviction pops from the front.
#[derive(Debug, Clone)]
pub struct EventBuffer<T> {
    capacity: usize,
    entries: IndexMap<String, T>,
}

impl<T: Identified> EventBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts at the front. A repeated identity is moved, never duplicated.
    pub fn insert(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        let key = item.identity().to_string();
        self.entries.shift_remove(&key);
        self.entries.insert(key, item);
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }

    /// Populates an empty buffer from a newest-first snapshot.
    ///
    /// Anything already present (typically pushed before the snapshot
    /// resolved) wins: the call is skipped as a whole.
    pub fn snapshot_fill<I>(&mut self, items: I) -> FillOutcome
    where
        I: IntoIterator<Item = T>,
    {
        if !self.entries.is_empty() {
            return FillOutcome::Skipped;
        }

        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for item in items {
            if kept.len() == self.capacity {
                break;
            }
            if seen.insert(item.identity().to_string()) {
                kept.push(item);
            }
        }

        let filled = kept.len();
        for item in kept.into_iter().rev() {
            self.entries.insert(item.identity().to_string(), item);
        }
        FillOutcome::Filled(filled)
    }

    /// Newest-first iteration.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.entries.values().rev()
    }

    pub fn newest(&self) -> Option<&T> {
        self.entries.values().next_back()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.iter().map(Identified::identity).collect()
    }

    pub fn to_filtered<P>(&self, predicate: P) -> FilteredView<'_, T, P>
    where
        P: Fn(&T) -> bool,
    {
        FilteredView {
            buffer: self,
            predicate,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Lazy view over a buffer; each `iter()` call restarts from the newest entry.
pub struct FilteredView<'a, T, P> {
    buffer: &'a EventBuffer<T>,
    predicate: P,
}

impl<'a, T, P> FilteredView<'a, T, P>
where
    T: Identified,
    P: Fn(&T) -> bool,
{
    pub fn iter(&self) -> impl Iterator<Item = &'a T> + '_ {
        self.buffer.iter().filter(move |item| (self.predicate)(*item))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}
