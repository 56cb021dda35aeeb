use std::collections::{HashSet, VecDeque};

/// Fixed-capacity, insertion-ordered set of ids.
///
/// Used as a dedup window over feeds that replay recent items after a
/// restart. Re-adding a present id does not refresh its position: the oldest
/// *inserted* id is always the first to go.
#[derive(Debug, Clone)]
pub struct BoundedRecencySet {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl BoundedRecencySet {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    /// Insert `id`, evicting the oldest member when full.
    /// Returns false if `id` was already present.
    pub fn add(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.members.remove(&oldest);
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
