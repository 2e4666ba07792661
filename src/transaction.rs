//! The host's transaction context.
//!
//! Resources are pushed under a transaction id and are all committed or all
//! rolled back when the host finishes that transaction. The context knows
//! nothing about FTP; it only drives the [`Transactionable`] callbacks.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use log::debug;

/// A resource whose lifetime follows a transaction.
pub trait Transactionable: Send {
    fn id(&self) -> &str;

    /// Called once when the resource joins a transaction.
    fn start(&mut self) {}

    fn commit(&mut self);

    fn rollback(&mut self);
}

#[derive(Default)]
pub struct TransactionContext {
    transactions: Mutex<HashMap<String, Vec<Box<dyn Transactionable>>>>,
}

impl TransactionContext {
    pub fn new() -> TransactionContext {
        TransactionContext::default()
    }

    /// Registers `resource` under `transaction_id`, opening the transaction if needed.
    pub fn push(&self, transaction_id: &str, mut resource: Box<dyn Transactionable>) {
        resource.start();
        debug!("resource {} joined transaction {}", resource.id(), transaction_id);
        self.lock()
            .entry(transaction_id.to_string())
            .or_default()
            .push(resource);
    }

    /// True if `resource_id` is registered under `transaction_id`.
    pub fn contains(&self, transaction_id: &str, resource_id: &str) -> bool {
        self.lock()
            .get(transaction_id)
            .is_some_and(|resources| resources.iter().any(|r| r.id() == resource_id))
    }

    /// Ids of the transactions that are still open.
    pub fn transaction_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Ids of the resources registered under `transaction_id`, in registration order.
    pub fn resource_ids(&self, transaction_id: &str) -> Vec<String> {
        self.lock()
            .get(transaction_id)
            .map(|resources| resources.iter().map(|r| r.id().to_string()).collect())
            .unwrap_or_default()
    }

    /// Commits every resource of `transaction_id` and closes the transaction.
    /// Returns how many resources were committed.
    pub fn commit(&self, transaction_id: &str) -> usize {
        let resources = self.take(transaction_id);
        debug!("committing {} resource(s) of transaction {}", resources.len(), transaction_id);
        let count = resources.len();
        for mut resource in resources {
            resource.commit();
        }
        count
    }

    /// Rolls back every resource of `transaction_id` and closes the transaction.
    /// Returns how many resources were rolled back.
    pub fn rollback(&self, transaction_id: &str) -> usize {
        let resources = self.take(transaction_id);
        debug!("rolling back {} resource(s) of transaction {}", resources.len(), transaction_id);
        let count = resources.len();
        for mut resource in resources {
            resource.rollback();
        }
        count
    }

    // Resources are finished outside the lock; closing them may block on the network.
    fn take(&self, transaction_id: &str) -> Vec<Box<dyn Transactionable>> {
        self.lock().remove(transaction_id).unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Box<dyn Transactionable>>>> {
        self.transactions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recorder {
        id: String,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn boxed(id: &str, events: &Arc<Mutex<Vec<String>>>) -> Box<dyn Transactionable> {
            Box::new(Recorder {
                id: id.to_string(),
                events: Arc::clone(events),
            })
        }

        fn record(&self, event: &str) {
            self.events.lock().unwrap().push(format!("{} {}", event, self.id));
        }
    }

    impl Transactionable for Recorder {
        fn id(&self) -> &str {
            &self.id
        }

        fn start(&mut self) {
            self.record("start");
        }

        fn commit(&mut self) {
            self.record("commit");
        }

        fn rollback(&mut self) {
            self.record("rollback");
        }
    }

    #[test]
    fn commit_finishes_resources_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let context = TransactionContext::new();
        context.push("tx", Recorder::boxed("a", &events));
        context.push("tx", Recorder::boxed("b", &events));
        assert!(context.contains("tx", "b"));
        assert_eq!(context.resource_ids("tx"), vec!["a", "b"]);

        assert_eq!(context.commit("tx"), 2);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start a", "start b", "commit a", "commit b"]
        );
        assert!(context.transaction_ids().is_empty());
        assert!(!context.contains("tx", "a"));
    }

    #[test]
    fn rollback_only_touches_its_transaction() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let context = TransactionContext::new();
        context.push("one", Recorder::boxed("a", &events));
        context.push("two", Recorder::boxed("b", &events));

        assert_eq!(context.rollback("one"), 1);
        assert_eq!(context.rollback("one"), 0);
        assert_eq!(context.transaction_ids(), vec!["two".to_string()]);
        assert!(events.lock().unwrap().contains(&"rollback a".to_string()));
        assert!(!events.lock().unwrap().contains(&"rollback b".to_string()));
    }
}
