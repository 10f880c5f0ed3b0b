use chrono::{DateTime, Utc};
use policy_core::{Policy, PolicyDraft, PolicyId};

use crate::error::StoreError;

/// Persistence capability for policies.
///
/// Anything satisfying this contract can back the service; callers never see
/// a concrete engine. Writes only take validated [`PolicyDraft`]s.
pub trait Storage: Send + Sync {
    /// Insert a new policy and return it with its assigned id and timestamps.
    fn create(&self, draft: &PolicyDraft) -> Result<Policy, StoreError>;

    /// Fetch one policy. Missing ids yield [`StoreError::NotFound`].
    fn read(&self, id: PolicyId) -> Result<Policy, StoreError>;

    /// Every stored policy, ordered by id.
    fn read_all(&self) -> Result<Vec<Policy>, StoreError>;

    /// Replace the mutable fields of a policy. Zero affected rows yields
    /// [`StoreError::NotFound`].
    fn update(
        &self,
        id: PolicyId,
        draft: &PolicyDraft,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove a policy. Zero affected rows yields [`StoreError::NotFound`].
    fn delete(&self, id: PolicyId) -> Result<(), StoreError>;
}
