//! Container Service - interactive attach and signal delivery.

mod api;
pub mod attach;
pub mod signal;

pub use api::ContainerApiHandler;
pub use attach::{AttachTarget, ChannelSink, StreamSource};
