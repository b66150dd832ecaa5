pub mod diff;
pub mod types;
pub mod webhook;

pub use types::{LabelSet, MergeState, Platform, PullRequestContext, ReviewVerdict, SizeMetrics};
pub use webhook::{
    parse_event, CommentAction, EventKind, PayloadError, PullRequestAction, ReviewAction, WebhookEvent,
};
