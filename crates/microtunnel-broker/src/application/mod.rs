//! Application layer: turning decoded requests into network operations.
//!
//! The [`Dispatcher`] is the only component that opens, uses or retires proxy
//! sessions in response to the control client.  It never touches the control
//! socket itself; it hands back the [`Response`](microtunnel_core::Response)
//! to send, if any, and the reactor writes it.

pub mod dispatch;

pub use dispatch::Dispatcher;
