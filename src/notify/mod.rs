//! Notification dispatch pipeline: channel construction, send policy,
//! optimistic send claiming, and delivery.

pub mod channel;
pub mod context;
pub mod dispatcher;
pub mod image;
pub mod registry;
pub mod test;

pub use channel::{ChannelKind, Notifier, NotifyError, ValidationError};
pub use context::{state_description, NotifyContext, StateDescription};
pub use dispatcher::{DispatchError, Dispatcher};
pub use image::{ImageError, ImageUploader, NoopRenderer, NoopUploader, Renderer};
pub use registry::{ChannelDescriptor, ChannelRegistry};
pub use test::{send_test_notification, TestNotificationError, TestNotificationRequest};
