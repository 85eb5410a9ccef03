//! Shardcast Entity Library
//!
//! This crate hosts entities on a pod: addressable, single-incarnation
//! units of state and behavior pinned to shards.
//!
//! The entity manager performs:
//! - On-demand entity startup when the first message arrives
//! - Mailbox delivery with optional request-response replies
//! - Idle expiration (entities stop after a quiet period)
//! - Graceful termination on shard handover and pod shutdown

pub mod config;
pub mod facade;
pub mod mailbox;
pub mod manager;
pub mod message;
pub mod recipient;

// Re-export main types
pub use config::EntityConfig;
pub use facade::{LocalSharding, ShardingFacade};
pub use mailbox::{EntityMessage, MailboxReceiver};
pub use manager::{EntityBehavior, EntityManager};
pub use message::{reply_channel, ReplyChannel, ReplyReceiver};
pub use recipient::RecipientType;
pub use shardcast_core::ReplyId;
