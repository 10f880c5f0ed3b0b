pub mod events;
pub mod ids;
pub mod policy;

pub use events::{Notification, NotificationKind};
pub use ids::SubscriberId;
pub use policy::{Policy, PolicyDraft, PolicyId, PolicyRequest, ValidationError};
