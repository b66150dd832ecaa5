//! Event routing.
//!
//! The [`Router`] maps a decoded [`WebhookEvent`] plus the freshly fetched
//! [`PullRequestContext`] to a [`Plan`]. Planning is pure: label policies run
//! against a projected label set that every planned mutation is applied to,
//! so later steps (the merge gate in particular) see the state the plan will
//! produce and mutations that would not change anything are never planned.

pub mod messages;
pub mod types;

pub use types::{Action, Plan};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::commands::{self, ImperativeCommand, LabelCommand, ParsedComment, RetestTarget};
use crate::config::{CheckSpec, Config, ConfigError, RepositoryConfig, ResolvedRepository};
use crate::platform::{CommitState, CommitStatus, PlatformClient, PlatformError};
use crate::policy::colors::color_for;
use crate::policy::labels::{
    compute_size_label, reconcile_branch_label, reconcile_size_label, target_versions, user_label_mutation,
    CAN_BE_MERGED_LABEL, HOLD_LABEL, TARGET_VERSION_PREFIX, VERIFIED_LABEL, WIP_LABEL,
};
use crate::policy::review::{is_mergeable, merge_key, reset_on_new_commit, ReviewTracker};
use crate::policy::security;
use crate::policy::{LabelAction, LabelMutation};
use crate::pr::{
    CommentAction, EventKind, LabelSet, MergeState, PullRequestAction, PullRequestContext, ReviewAction,
    ReviewVerdict, WebhookEvent,
};
use crate::worker::Job;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to fetch pull request #{number}: {source}")]
    Fetch {
        number: u64,
        #[source]
        source: PlatformError,
    },
}

/// Find the configuration for the delivery's repository.
///
/// A repository that is not configured, or has no usable token, fails the
/// whole delivery before anything is mutated.
pub fn resolve_repository(config: &Config, event: &WebhookEvent) -> Result<ResolvedRepository, ConfigError> {
    let resolved = config.resolve(&event.repository)?;
    if resolved.settings.platform != event.platform {
        warn!(
            repository = %event.repository,
            configured = %resolved.settings.platform,
            delivered = %event.platform,
            "delivery platform differs from configuration, using configuration"
        );
    }
    Ok(resolved)
}

/// Fetch the current pull request state and plan the event against it.
#[instrument(skip_all, fields(repository = %event.repository, number = event.number, event = %event.kind))]
pub async fn plan_delivery(
    router: &Router<'_>,
    client: &dyn PlatformClient,
    event: &WebhookEvent,
) -> Result<Plan, DispatchError> {
    let ctx = client
        .fetch_pull_request(event.number)
        .await
        .map_err(|source| DispatchError::Fetch {
            number: event.number,
            source,
        })?;
    let plan = router.plan(event, &ctx);
    info!(actions = plan.actions.len(), "planned delivery");
    Ok(plan)
}

/// Plans deliveries for one repository.
#[derive(Debug, Clone, Copy)]
pub struct Router<'a> {
    settings: &'a RepositoryConfig,
    bot_user: Option<&'a str>,
}

impl<'a> Router<'a> {
    pub fn new(settings: &'a RepositoryConfig, bot_user: Option<&'a str>) -> Self {
        Self { settings, bot_user }
    }

    fn is_bot(&self, user: &str) -> bool {
        self.bot_user.is_some_and(|bot| bot.eq_ignore_ascii_case(user))
    }

    pub fn plan(&self, event: &WebhookEvent, ctx: &PullRequestContext) -> Plan {
        let mut plan = PlanBuilder::new(self.settings, ctx);

        match &event.kind {
            EventKind::PullRequest(action) => match action {
                PullRequestAction::Opened | PullRequestAction::Reopened => self.on_opened(&mut plan),
                PullRequestAction::Synchronize => self.on_synchronize(&mut plan),
                PullRequestAction::Closed { merged } => self.on_closed(&mut plan, *merged),
                PullRequestAction::Labeled(label) | PullRequestAction::Unlabeled(label) => {
                    self.on_label_changed(&mut plan, label)
                }
                PullRequestAction::Other(action) => debug!(action = %action, "ignoring pull request action"),
            },
            EventKind::Comment(CommentAction::Created { body }) => {
                if self.is_bot(&event.sender) {
                    debug!(sender = %event.sender, "ignoring comment from bot user");
                } else if commands::is_signed(body) {
                    debug!(sender = %event.sender, "ignoring comment posted by the reconciler");
                } else {
                    self.on_comment(&mut plan, &event.sender, body);
                }
            }
            EventKind::Comment(CommentAction::Other(action)) => debug!(action = %action, "ignoring comment action"),
            EventKind::Review(ReviewAction::Submitted(verdict)) => self.on_review(&mut plan, &event.sender, *verdict),
            EventKind::Review(ReviewAction::Withdrawn) => self.on_withdrawn(&mut plan, &event.sender),
            EventKind::Review(ReviewAction::Other(action)) => debug!(action = %action, "ignoring review action"),
        }

        Plan {
            repository: ctx.repository_full_name.clone(),
            number: ctx.number,
            event: event.kind.to_string(),
            actions: plan.actions,
        }
    }

    fn on_opened(&self, plan: &mut PlanBuilder<'_>) {
        let ctx = plan.ctx;
        plan.reconcile_size();
        plan.mutate(reconcile_branch_label(&plan.labels, &ctx.base_branch));

        plan.push(Action::AddAssignee(ctx.author.clone()));
        plan.request_reviewers(false);

        if self.settings.create_issue_for_new_pr {
            plan.push(Action::CreateTrackingIssue {
                title: messages::tracking_issue_title(ctx),
                body: messages::tracking_issue_body(ctx),
                assignee: Some(ctx.author.clone()),
            });
        }
        plan.push(Action::CommentOnce {
            marker: messages::WELCOME_MARKER.to_string(),
            body: messages::welcome(ctx, self.settings),
        });

        plan.queue_all_checks();
        plan.verified_status();
        plan.merge_gate(true);
    }

    fn on_synchronize(&self, plan: &mut PlanBuilder<'_>) {
        plan.reconcile_size();
        plan.mutate(reset_on_new_commit(&plan.labels));
        plan.request_reviewers(false);
        plan.queue_all_checks();
        plan.verified_status();
        plan.merge_gate(true);
    }

    fn on_closed(&self, plan: &mut PlanBuilder<'_>, merged: bool) {
        let ctx = plan.ctx;
        let merged = merged || ctx.is_merged();

        if self.settings.create_issue_for_new_pr {
            plan.push(Action::CloseTrackingIssue {
                title: messages::tracking_issue_title(ctx),
                comment: messages::closed_comment(merged),
            });
        }

        if merged {
            for target in target_versions(&plan.labels) {
                let requested_by = format!("label `{TARGET_VERSION_PREFIX}{target}`");
                plan.cherry_pick(target, requested_by);
            }
        }
    }

    fn on_label_changed(&self, plan: &mut PlanBuilder<'_>, label: &str) {
        if label.eq_ignore_ascii_case(VERIFIED_LABEL) {
            plan.verified_status();
        }
        if !label.eq_ignore_ascii_case(CAN_BE_MERGED_LABEL) {
            plan.merge_gate(false);
        }
    }

    fn on_comment(&self, plan: &mut PlanBuilder<'_>, sender: &str, body: &str) {
        let ctx = plan.ctx;
        let parsed = ParsedComment::parse(body);
        if parsed.is_empty() {
            debug!("comment has no commands");
            return;
        }

        let cherry_pick_targets = parsed.cherry_pick_targets();
        if !cherry_pick_targets.is_empty() && !ctx.is_merged() {
            info!(targets = ?cherry_pick_targets, "cherry-pick requested on unmerged pull request");
            plan.push(Action::Comment(messages::cherry_pick_not_merged(&cherry_pick_targets)));
            return;
        }

        let verified_before = plan.labels.contains(VERIFIED_LABEL);
        let mut force_gate_status = false;

        for command in &parsed.label_commands {
            match command {
                LabelCommand::Add(_) | LabelCommand::Remove(_) => {
                    if let Some(mutation) = user_label_mutation(command) {
                        plan.mutate(vec![mutation]);
                    }
                }
                LabelCommand::Lgtm => {
                    let mutations = plan.tracker().record_review(&plan.labels, sender, ReviewVerdict::Approved);
                    plan.mutate(mutations);
                }
                LabelCommand::Unlgtm => {
                    let mutations = plan.tracker().withdraw_approval(&plan.labels, sender);
                    plan.mutate(mutations);
                }
                LabelCommand::CherryPick(branches) => {
                    for branch in branches {
                        plan.cherry_pick(branch.clone(), sender.to_string());
                    }
                }
            }
        }

        for command in &parsed.imperative_commands {
            match command {
                ImperativeCommand::Retest(RetestTarget::All) => {
                    if self.settings.checks().is_empty() {
                        plan.push(Action::Comment(messages::unknown_check("all", &[])));
                    } else {
                        plan.queue_all_checks();
                    }
                }
                ImperativeCommand::Retest(RetestTarget::Check(name)) => match self.settings.check(name) {
                    Some(check) => plan.queue_check(check),
                    None => plan.push(Action::Comment(messages::unknown_check(name, &self.settings.checks()))),
                },
                ImperativeCommand::AssignReviewers => plan.request_reviewers(true),
                ImperativeCommand::CheckCanMerge => {
                    for (reviewer, verdict) in &ctx.review_states {
                        let mutations = plan.tracker().record_review(&plan.labels, reviewer, *verdict);
                        plan.mutate(mutations);
                    }
                    force_gate_status = true;
                }
                ImperativeCommand::Unknown(name) => debug!(command = %name, "ignoring unknown command"),
            }
        }

        if plan.labels.contains(VERIFIED_LABEL) != verified_before {
            plan.verified_status();
        }
        plan.merge_gate(force_gate_status);
    }

    fn on_review(&self, plan: &mut PlanBuilder<'_>, reviewer: &str, verdict: ReviewVerdict) {
        let mutations = plan.tracker().record_review(&plan.labels, reviewer, verdict);
        plan.mutate(mutations);
        plan.merge_gate(false);
    }

    fn on_withdrawn(&self, plan: &mut PlanBuilder<'_>, reviewer: &str) {
        let mutations = plan.tracker().withdraw_approval(&plan.labels, reviewer);
        plan.mutate(mutations);
        plan.merge_gate(false);
    }
}

/// Accumulates actions against a projected label set.
struct PlanBuilder<'a> {
    settings: &'a RepositoryConfig,
    ctx: &'a PullRequestContext,
    labels: LabelSet,
    /// Every label this plan adds or removes, in plan order
    mutated: Vec<String>,
    actions: Vec<Action>,
}

impl<'a> PlanBuilder<'a> {
    fn new(settings: &'a RepositoryConfig, ctx: &'a PullRequestContext) -> Self {
        Self {
            settings,
            ctx,
            labels: ctx.current_labels.clone(),
            mutated: Vec::new(),
            actions: Vec::new(),
        }
    }

    fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    fn tracker(&self) -> ReviewTracker<'a> {
        ReviewTracker::new(&self.ctx.author, &self.settings.approvers)
    }

    /// Plan the mutations that change the projected set. Returns whether any did.
    fn mutate(&mut self, mutations: Vec<LabelMutation>) -> bool {
        let mut changed = false;
        for mutation in mutations {
            if !self.labels.apply(&mutation) {
                continue;
            }
            if mutation.action == LabelAction::Add {
                self.actions.push(Action::EnsureRepoLabel {
                    name: mutation.label.clone(),
                    color: color_for(&mutation.label),
                });
            }
            self.mutated.push(mutation.label.clone());
            self.actions.push(Action::Label(mutation));
            changed = true;
        }
        changed
    }

    fn reconcile_size(&mut self) {
        let size = self.ctx.size_metrics;
        let label = compute_size_label(size.additions, size.deletions);
        let mutations = reconcile_size_label(&self.labels, &label);
        self.mutate(mutations);
    }

    fn status(&mut self, context: &str, state: CommitState, description: &str, derived_from: Vec<String>) {
        self.actions.push(Action::SetStatus {
            sha: self.ctx.head_sha.clone(),
            status: CommitStatus::new(context, state, description),
            derived_from,
        });
    }

    /// Labels changed by this plan that the merge gate reads.
    fn gate_inputs(&self) -> Vec<String> {
        self.mutated
            .iter()
            .filter(|label| {
                merge_key(label).is_some()
                    || [HOLD_LABEL, WIP_LABEL, CAN_BE_MERGED_LABEL]
                        .iter()
                        .any(|name| label.eq_ignore_ascii_case(name))
            })
            .cloned()
            .collect()
    }

    /// `explicit` requests come from `/assign-reviewers` and report an empty list.
    fn request_reviewers(&mut self, explicit: bool) {
        let reviewers = self.settings.reviewers_for(&self.ctx.author);
        if !reviewers.is_empty() {
            self.push(Action::RequestReviewers(reviewers));
        } else if explicit {
            self.push(Action::Comment(messages::no_reviewers()));
        }
    }

    /// Validate a check command and either queue it or report the rejection.
    fn queue_check(&mut self, check: CheckSpec) {
        let verdict = security::validate(&check.command);
        if verdict.is_safe {
            self.status(&check.name, CommitState::Pending, "Queued", vec![]);
            self.push(Action::Enqueue(Job::RunCheck {
                check,
                head_sha: self.ctx.head_sha.clone(),
            }));
            return;
        }

        let reason = verdict.reason.unwrap_or_default();
        warn!(check = %check.name, reason = %reason, "rejected check command");
        self.status(&check.name, CommitState::Failure, "Command rejected", vec![]);
        self.push(Action::CommentOnce {
            marker: messages::rejection_marker(&check.name, &self.ctx.head_sha),
            body: messages::command_rejected(&check, &reason, &self.ctx.head_sha),
        });
    }

    fn queue_all_checks(&mut self) {
        for check in self.settings.checks() {
            self.queue_check(check);
        }
    }

    fn cherry_pick(&mut self, target_branch: String, requested_by: String) {
        let commit_sha = self
            .ctx
            .merge_commit_sha
            .clone()
            .unwrap_or_else(|| self.ctx.head_sha.clone());
        self.push(Action::Enqueue(Job::CherryPick {
            target_branch,
            commit_sha,
            source_title: self.ctx.title.clone(),
            requested_by,
        }));
    }

    /// The `verified` status mirrors the projected `verified` label.
    fn verified_status(&mut self) {
        if !self.settings.verified_job {
            return;
        }
        let derived_from = vec![VERIFIED_LABEL.to_string()];
        if self.labels.contains(VERIFIED_LABEL) {
            self.status(VERIFIED_LABEL, CommitState::Success, "Verified", derived_from);
        } else {
            self.status(VERIFIED_LABEL, CommitState::Pending, "Waiting for verification", derived_from);
        }
    }

    /// Reconcile the `can-be-merged` label, and its status when the label
    /// changed or `force_status` is set.
    fn merge_gate(&mut self, force_status: bool) {
        if self.ctx.merge_state != MergeState::Open {
            return;
        }

        let required = self.settings.required_merge_labels();
        let blocked = self.labels.contains(HOLD_LABEL) || self.labels.contains(WIP_LABEL);
        let mergeable = !blocked && is_mergeable(&self.labels, &required);

        let mutation = match (mergeable, self.labels.contains(CAN_BE_MERGED_LABEL)) {
            (true, false) => Some(LabelMutation::add(CAN_BE_MERGED_LABEL)),
            (false, true) => Some(LabelMutation::remove(CAN_BE_MERGED_LABEL)),
            _ => None,
        };
        let changed = mutation.is_some_and(|m| self.mutate(vec![m]));

        if changed || force_status {
            let derived_from = self.gate_inputs();
            if mergeable {
                self.status(CAN_BE_MERGED_LABEL, CommitState::Success, "Ready to merge", derived_from);
            } else {
                let description = format!("Requires: {}", required.join(", "));
                self.status(CAN_BE_MERGED_LABEL, CommitState::Pending, &description, derived_from);
            }
        }
    }
}
