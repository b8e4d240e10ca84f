//! Change notification bus.
//!
//! Repositories publish a [`ChangeEvent`] after every successful mutation.
//! Views hold either:
//! - a [`Subscription`]: a bounded channel of [`NestEvent`]s, or
//! - a [`Listener`]: a callback run synchronously on publish.
//!
//! Both unsubscribe when dropped, so a view that goes away cannot leak its
//! registration.
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new();
//! let sub = bus.subscribe(SubscriptionConfig {
//!     filter: TopicFilter::only(Topic::Pets),
//!     ..Default::default()
//! });
//!
//! bus.publish(ChangeEvent::new(Topic::Pets, Change::Replaced));
//!
//! match sub.try_recv() {
//!     Ok(NestEvent::Changed(event)) => println!("{} changed", event.topic),
//!     _ => {}
//! }
//! ```

mod bus;
mod types;

pub use bus::{EventBus, Listener, Subscription};
pub use types::{
    Change, ChangeEvent, DropReason, NestEvent, SubscriptionConfig, SubscriptionId, Topic,
    TopicFilter,
};
