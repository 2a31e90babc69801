//! Registry of in-flight job tickets, keyed by request identifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::sync::lock_unpoisoned;
use crate::ticket::JobTicket;

/// Identifier → ticket map.
///
/// Mutated by the coordinator on registration and terminal completion, and
/// by [`crate::ticket::JobTicket::cancel`] from caller threads, so access is
/// serialised behind a mutex. Entries for non-persistent, non-global jobs
/// are removed the moment they complete; persistent and global entries
/// survive until cancelled or the engine is torn down.
#[derive(Debug, Default)]
pub(crate) struct JobRegistry {
    jobs: Mutex<HashMap<String, Arc<JobTicket>>>,
}

impl JobRegistry {
    pub(crate) fn insert(&self, ticket: Arc<JobTicket>) {
        lock_unpoisoned(&self.jobs).insert(ticket.identifier().to_owned(), ticket);
    }

    pub(crate) fn get(&self, identifier: &str) -> Option<Arc<JobTicket>> {
        lock_unpoisoned(&self.jobs).get(identifier).cloned()
    }

    pub(crate) fn remove(&self, identifier: &str) -> Option<Arc<JobTicket>> {
        lock_unpoisoned(&self.jobs).remove(identifier)
    }

    pub(crate) fn contains(&self, identifier: &str) -> bool {
        lock_unpoisoned(&self.jobs).contains_key(identifier)
    }

    /// Snapshot of every registered ticket.
    pub(crate) fn all(&self) -> Vec<Arc<JobTicket>> {
        lock_unpoisoned(&self.jobs).values().cloned().collect()
    }

    /// Removes and returns every registered ticket; used when the
    /// coordinator terminates and must fail outstanding work.
    pub(crate) fn drain(&self) -> Vec<Arc<JobTicket>> {
        lock_unpoisoned(&self.jobs).drain().map(|(_, t)| t).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Weak;

    use fcp_wire::{Command, Persistence};

    use crate::ticket::NoopObserver;

    fn ticket(identifier: &str, persistence: Persistence, global: bool) -> Arc<JobTicket> {
        let command = Command::new("ClientGet")
            .identifier(identifier)
            .persistence(persistence)
            .global(global);
        Arc::new(JobTicket::new(
            identifier.to_owned(),
            command,
            Box::new(NoopObserver),
            Weak::new(),
        ))
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let registry = JobRegistry::default();
        registry.insert(ticket("a", Persistence::Connection, false));
        registry.insert(ticket("b", Persistence::Forever, true));

        assert!(registry.contains("a"));
        assert_eq!(
            registry.get("b").map(|t| t.identifier().to_owned()),
            Some(String::from("b"))
        );
        assert!(registry.remove("a").is_some());
        assert!(!registry.contains("a"));
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn drain_empties_the_registry() {
        let registry = JobRegistry::default();
        registry.insert(ticket("a", Persistence::Connection, false));
        registry.insert(ticket("b", Persistence::Reboot, false));
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.all().is_empty());
    }
}
