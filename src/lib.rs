//! Webhook-driven pull request automation.
//!
//! A delivery flows through four stages: the payload is parsed into a
//! [`pr::WebhookEvent`], the [`dispatch::Router`] plans the label, status and
//! comment changes the pull request needs, the [`executor::Executor`] applies
//! that plan through a [`platform::PlatformClient`], and long-running work
//! (checks, cherry-picks) is handed to the background [`worker`].

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod platform;
pub mod policy;
pub mod pr;
pub mod report;
pub mod worker;
