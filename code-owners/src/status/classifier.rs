use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{CodeOwnerStatus, PathCodeOwnerStatus};
use crate::{
    accounts::AccountId,
    owner_config::Revision,
    resolver::ResolvedOwners,
    settings::{EffectiveSettings, LabelDefinition, RequiredApproval, SettingsError},
};

/// A vote on a label, cast on one patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub account: AccountId,
    pub label: String,
    pub value: i16,
    pub patch_set: u32,
}

impl Approval {
    pub fn new(account: AccountId, label: impl Into<String>, value: i16, patch_set: u32) -> Self {
        Self {
            account,
            label: label.into(),
            value,
            patch_set,
        }
    }
}

/// What the classifier needs to know about a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeState {
    pub project: String,
    pub branch: String,
    pub current_patch_set: u32,
    /// Revision of the destination branch that owner configs are read at.
    /// The branch tip if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_revision: Option<Revision>,
    pub owner: AccountId,
    pub uploader: AccountId,
    #[serde(default)]
    pub is_pure_revert: bool,
    #[serde(default)]
    pub reviewers: BTreeSet<AccountId>,
    #[serde(default)]
    pub approvals: Vec<Approval>,
}

impl ChangeState {
    fn current_approvals(&self) -> impl Iterator<Item = &Approval> {
        self.approvals
            .iter()
            .filter(move |approval| approval.patch_set == self.current_patch_set)
    }
}

struct LabelRequirement {
    approval: RequiredApproval,
    ignore_self_approval: bool,
}

impl LabelRequirement {
    fn new(approval: &RequiredApproval, labels: &[LabelDefinition]) -> Result<Self, SettingsError> {
        let label = labels
            .iter()
            .find(|label| label.name == approval.label)
            .ok_or_else(|| SettingsError::UnknownLabel(approval.label.clone()))?;
        Ok(Self {
            approval: approval.clone(),
            ignore_self_approval: label.ignore_self_approval,
        })
    }

    /// The first current approval that satisfies the requirement, where
    /// `counts` decides whose votes count.
    fn find<'c>(
        &self,
        change: &'c ChangeState,
        counts: impl Fn(AccountId) -> bool,
    ) -> Option<&'c Approval> {
        change.current_approvals().find(|approval| {
            self.approval
                .is_satisfied_by(&approval.label, approval.value)
                && !(self.ignore_self_approval && approval.account == change.uploader)
                && counts(approval.account)
        })
    }
}

/// Decides whether a path's code owners have approved a change.
pub struct ApprovalPolicy {
    required: LabelRequirement,
    overrides: Vec<LabelRequirement>,
    enable_implicit_approvals: bool,
    exempted_accounts: BTreeSet<AccountId>,
    exempt_pure_reverts: bool,
}

impl ApprovalPolicy {
    pub fn new(
        settings: &EffectiveSettings,
        labels: &[LabelDefinition],
    ) -> Result<Self, SettingsError> {
        Ok(Self {
            required: LabelRequirement::new(&settings.required_approval, labels)?,
            overrides: settings
                .override_approvals
                .iter()
                .map(|approval| LabelRequirement::new(approval, labels))
                .collect::<Result<_, _>>()?,
            enable_implicit_approvals: settings.enable_implicit_approvals,
            exempted_accounts: settings.exempted_accounts.clone(),
            exempt_pure_reverts: settings.exempt_pure_reverts,
        })
    }

    /// Classify one path of `change`. The first rule that applies wins:
    /// override approvals, exemptions, code owner approvals (explicit or
    /// implicit), and finally whether there are code owners at all.
    pub fn classify(&self, owners: &ResolvedOwners, change: &ChangeState) -> PathCodeOwnerStatus {
        let verdict = |status, reason: String| PathCodeOwnerStatus {
            path: owners.path.clone(),
            status,
            owners: (!owners.owned_by_all_users).then(|| owners.accounts.clone()),
            reasons: vec![reason],
        };
        let is_owner =
            |account: AccountId| owners.owned_by_all_users || owners.accounts.contains(&account);

        for requirement in &self.overrides {
            if let Some(approval) = requirement.find(change, |_| true) {
                return verdict(
                    CodeOwnerStatus::Approved,
                    format!(
                        "override approval {} by account {} is present",
                        requirement.approval, approval.account
                    ),
                );
            }
        }

        if self.exempted_accounts.contains(&change.uploader) {
            return verdict(
                CodeOwnerStatus::Approved,
                format!(
                    "patch set uploader {} is exempted from requiring code owner approvals",
                    change.uploader
                ),
            );
        }
        if self.exempt_pure_reverts && change.is_pure_revert {
            return verdict(
                CodeOwnerStatus::Approved,
                "change is a pure revert and is exempted from requiring code owner approvals"
                    .to_owned(),
            );
        }

        if let Some(approval) = self.required.find(change, is_owner) {
            let reason = if owners.is_default_owner {
                format!("approved by {} who is a fallback code owner", approval.account)
            } else {
                format!("approved by code owner {}", approval.account)
            };
            return verdict(CodeOwnerStatus::Approved, reason);
        }

        if self.enable_implicit_approvals
            && !self.required.ignore_self_approval
            && change.uploader == change.owner
            && is_owner(change.uploader)
        {
            return verdict(
                CodeOwnerStatus::Approved,
                format!(
                    "implicitly approved by the patch set uploader {} who is a code owner",
                    change.uploader
                ),
            );
        }

        if owners.owned_by_all_users {
            // Fallback owners still need someone to be asked
            return if owners.is_default_owner && change.reviewers.is_empty() {
                verdict(
                    CodeOwnerStatus::InsufficientReviewers,
                    "all users are fallback code owners, but the change has no reviewers"
                        .to_owned(),
                )
            } else {
                verdict(
                    CodeOwnerStatus::Pending,
                    format!(
                        "waiting for {} from a reviewer, all users are code owners",
                        self.required.approval
                    ),
                )
            };
        }

        if !owners.accounts.is_empty() {
            return verdict(
                CodeOwnerStatus::Pending,
                format!("waiting for {} from a code owner", self.required.approval),
            );
        }

        verdict(
            CodeOwnerStatus::InsufficientReviewers,
            "no code owners are defined".to_owned(),
        )
    }
}
