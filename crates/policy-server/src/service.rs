//! Policy CRUD with change notification.

use std::sync::Arc;

use chrono::Utc;
use policy_core::{Notification, Policy, PolicyId, PolicyRequest};
use policy_store::Storage;
use tracing::{info, instrument};

use crate::error::ServiceError;
use crate::registry::ConnectionRegistry;

/// Validates requests, calls the store, and notifies subscribers after every
/// committed create or update. Deletes are not announced.
pub struct PolicyService {
    store: Arc<dyn Storage>,
    registry: Arc<ConnectionRegistry>,
}

impl PolicyService {
    pub fn new(store: Arc<dyn Storage>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[instrument(skip_all, fields(name = %request.policy_name))]
    pub fn create(&self, request: PolicyRequest) -> Result<Policy, ServiceError> {
        let draft = request.validate()?;
        let policy = self.store.create(&draft)?;
        info!(policy_id = policy.id, "policy created");

        self.registry.broadcast(&Notification::created(policy.id));
        Ok(policy)
    }

    #[instrument(skip(self, request), fields(policy_id = id))]
    pub fn update(&self, id: PolicyId, request: PolicyRequest) -> Result<(), ServiceError> {
        let draft = request.validate()?;
        self.store.update(id, &draft, Utc::now())?;
        info!(policy_id = id, "policy updated");

        self.registry.broadcast(&Notification::updated(id));
        Ok(())
    }

    #[instrument(skip(self), fields(policy_id = id))]
    pub fn delete(&self, id: PolicyId) -> Result<(), ServiceError> {
        self.store.delete(id)?;
        info!(policy_id = id, "policy deleted");
        Ok(())
    }

    pub fn get(&self, id: PolicyId) -> Result<Policy, ServiceError> {
        Ok(self.store.read(id)?)
    }

    pub fn list_all(&self) -> Result<Vec<Policy>, ServiceError> {
        Ok(self.store.read_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::DateTime;
    use policy_core::PolicyDraft;
    use policy_store::{Database, PolicyRepo, StoreError};
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::registry::{Frame, Subscriber};

    /// Wraps a real repo and counts write calls.
    struct CountingStore {
        inner: PolicyRepo,
        writes: AtomicUsize,
        fail_writes: bool,
    }

    impl CountingStore {
        fn new(fail_writes: bool) -> Self {
            Self {
                inner: PolicyRepo::new(Database::in_memory().unwrap()),
                writes: AtomicUsize::new(0),
                fail_writes,
            }
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        fn record_write(&self) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                return Err(StoreError::Database("disk full".into()));
            }
            Ok(())
        }
    }

    impl Storage for CountingStore {
        fn create(&self, draft: &PolicyDraft) -> Result<Policy, StoreError> {
            self.record_write()?;
            self.inner.create(draft)
        }
        fn read(&self, id: PolicyId) -> Result<Policy, StoreError> {
            self.inner.read(id)
        }
        fn read_all(&self) -> Result<Vec<Policy>, StoreError> {
            self.inner.read_all()
        }
        fn update(
            &self,
            id: PolicyId,
            draft: &PolicyDraft,
            updated_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.record_write()?;
            self.inner.update(id, draft, updated_at)
        }
        fn delete(&self, id: PolicyId) -> Result<(), StoreError> {
            self.record_write()?;
            self.inner.delete(id)
        }
    }

    struct Fixture {
        service: PolicyService,
        store: Arc<CountingStore>,
        rx: mpsc::UnboundedReceiver<Frame>,
    }

    fn fixture(fail_writes: bool) -> Fixture {
        let store = Arc::new(CountingStore::new(fail_writes));
        let registry = Arc::new(ConnectionRegistry::new());
        let (subscriber, rx) = Subscriber::channel();
        registry.register(subscriber);
        let service = PolicyService::new(store.clone(), registry);
        Fixture { service, store, rx }
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Option<Notification> {
        rx.try_recv()
            .ok()
            .map(|frame| serde_json::from_str(&frame).unwrap())
    }

    #[test]
    fn create_stores_and_broadcasts_once() {
        let mut f = fixture(false);
        let policy = f
            .service
            .create(PolicyRequest::new("p1", "a", json!({})))
            .unwrap();

        assert_eq!(f.store.writes(), 1);
        let event = next_event(&mut f.rx).unwrap();
        assert_eq!(
            event,
            Notification {
                timestamp: event.timestamp,
                ..Notification::created(policy.id)
            }
        );
        assert!(next_event(&mut f.rx).is_none());
    }

    #[test]
    fn create_with_empty_author_touches_nothing() {
        let mut f = fixture(false);
        let err = f
            .service
            .create(PolicyRequest::new("p1", "", json!({})))
            .unwrap_err();

        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(f.store.writes(), 0);
        assert!(next_event(&mut f.rx).is_none());
    }

    #[test]
    fn failed_store_write_does_not_broadcast() {
        let mut f = fixture(true);
        let err = f
            .service
            .create(PolicyRequest::new("p1", "a", json!({})))
            .unwrap_err();

        assert!(matches!(err, ServiceError::Store(_)));
        assert_eq!(f.store.writes(), 1);
        assert!(next_event(&mut f.rx).is_none());
    }

    #[test]
    fn update_broadcasts_and_stamps_time() {
        let mut f = fixture(false);
        let created = f
            .service
            .create(PolicyRequest::new("p1", "a", json!({"v": 1})))
            .unwrap();
        next_event(&mut f.rx);

        f.service
            .update(created.id, PolicyRequest::new("p1", "b", json!({"v": 2})))
            .unwrap();

        let event = next_event(&mut f.rx).unwrap();
        assert_eq!(event.kind, policy_core::NotificationKind::PolicyUpdated);
        assert_eq!(event.policy_id, created.id);

        let fetched = f.service.get(created.id).unwrap();
        assert_eq!(fetched.author, "b");
        assert!(fetched.updated_at >= created.updated_at);
    }

    #[test]
    fn update_validates_before_store() {
        let mut f = fixture(false);
        let err = f
            .service
            .update(1, PolicyRequest::new("", "a", json!({})))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(f.store.writes(), 0);
        assert!(next_event(&mut f.rx).is_none());
    }

    #[test]
    fn update_missing_is_not_found_without_broadcast() {
        let mut f = fixture(false);
        let err = f
            .service
            .update(99, PolicyRequest::new("p", "a", json!({})))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(next_event(&mut f.rx).is_none());
    }

    #[test]
    fn delete_missing_is_not_found_not_store_error() {
        let f = fixture(false);
        let err = f.service.delete(12345).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)), "got: {err:?}");
    }

    #[test]
    fn delete_store_failure_is_store_error() {
        let f = fixture(true);
        let err = f.service.delete(1).unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)), "got: {err:?}");
    }

    #[test]
    fn delete_does_not_broadcast() {
        let mut f = fixture(false);
        let created = f
            .service
            .create(PolicyRequest::new("p1", "a", json!({})))
            .unwrap();
        next_event(&mut f.rx);

        f.service.delete(created.id).unwrap();
        assert!(next_event(&mut f.rx).is_none());
        assert!(matches!(f.service.get(created.id), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn list_all_returns_every_policy() {
        let f = fixture(false);
        for name in ["a", "b", "c"] {
            f.service
                .create(PolicyRequest::new(name, "x", json!({})))
                .unwrap();
        }
        assert_eq!(f.service.list_all().unwrap().len(), 3);
    }
}
