//! Queue-group member selection

use std::collections::HashMap;

/// Picks the single member of a queue group that receives a message.
///
/// Members are chosen round-robin per group, skipping members that are not
/// ready (closed or disconnected), so instances sharing a group take turns.
#[derive(Debug, Default)]
pub struct GroupBalancer {
    counters: HashMap<String, usize>,
}

/// A candidate subscription in a queue group
pub trait GroupMember {
    fn ready(&self) -> bool;
}

impl GroupBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a member of `group` among `members`, or `None` if none is ready
    pub fn select<'a, M: GroupMember>(&mut self, group: &str, members: &[&'a M]) -> Option<&'a M> {
        let ready: Vec<&'a M> = members.iter().copied().filter(|m| m.ready()).collect();
        if ready.is_empty() {
            return None;
        }

        let counter = self.counters.entry(group.to_string()).or_insert(0);
        let current = *counter;
        *counter = counter.wrapping_add(1);
        ready.get(current % ready.len()).copied()
    }

    /// Forget the rotation of every group for which `live` is false
    pub fn retain_groups<F: Fn(&str) -> bool>(&mut self, live: F) {
        self.counters.retain(|group, _| live(group));
    }
}
