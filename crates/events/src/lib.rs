//! Artifex live event hub.
//!
//! This crate provides the push side of the media-job subsystem:
//!
//! - [`Event`] : the immutable lifecycle notification envelope.
//! - [`EventHub`] : in-process publish/subscribe broker. A single
//!   coordinating task owns the subscriber set, fans every event out to
//!   bounded per-subscriber buffers and evicts subscribers that fall behind.
//! - [`Subscription`] : the receiving end handed to one live connection.

pub mod event;
pub mod hub;

pub use event::Event;
pub use hub::{
    DisconnectReason, EventHub, HubConfig, HubMessage, HubStats, PublishOutcome, SubscriberId,
    Subscription,
};
