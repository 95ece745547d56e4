//! Outbound delivery: streaming fan-out and webhook push.

pub mod fanout;
pub mod push;

pub use fanout::{event_stream, FanOut, TaskEvent, TaskEventReceiver};
pub use push::PushNotifier;
