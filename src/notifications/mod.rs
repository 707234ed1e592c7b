//! Notification Service (spec.md §4.5): the dependency contract workers
//! and the Notification Derivation Pipeline call into for creating
//! notifications, consulting preferences, and delivering push.

mod delivery;
mod preferences;
mod service;

pub use delivery::{DeliveryPort, DeliveryPortDyn, LoggingDeliveryPort, PushPayload};
pub use preferences::{AllowAllPreferences, PreferencesPort, PreferencesPortDyn};
pub use service::{NotificationService, NotificationsPort, NotificationsPortDyn};
