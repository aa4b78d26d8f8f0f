use std::collections::BTreeSet;

use code_owners::{
    settings::CodeOwnersSettings,
    status::{Approval, ApprovalPolicy},
    AccountId, BackendConfigLoader, ChangeState, CodeOwnerResolver, CodeOwnerStatus,
    InMemoryAccounts, InMemoryRepo, LabelDefinition, RequiredApproval, ResolvedOwners,
};
use proptest::prelude::*;

fn owner_refs(repo: &InMemoryRepo, path: &str) -> (BTreeSet<String>, ResolvedOwners) {
    let settings = CodeOwnersSettings::default().for_branch("main").unwrap();
    let loader = BackendConfigLoader::new(repo, settings.backend.clone());
    let accounts = InMemoryAccounts::new();
    let resolved = CodeOwnerResolver::new("p", &loader, repo, &accounts, &settings)
        .resolve_path_owners(path, None)
        .unwrap();
    let refs = resolved.owner_refs.iter().map(|o| o.to_string()).collect();
    (refs, resolved)
}

fn folder(depth: usize) -> String {
    let mut folder = "/".to_owned();
    for level in 1..=depth {
        folder.push_str(&format!("d{}/", level));
    }
    folder
}

proptest! {
    /// A path's owners are those of every folder from the nearest opt-out
    /// (or the root) down to the path's folder.
    #[test]
    fn test_ascent_collects_owners_up_to_opt_out(
        levels in prop::collection::vec((any::<bool>(), any::<bool>()), 1..6),
    ) {
        let repo = InMemoryRepo::new();
        let depth = levels.len() - 1;
        for (level, (has_owner, no_parent)) in levels.iter().enumerate() {
            let mut text = String::new();
            if *no_parent {
                text.push_str("set noparent\n");
            }
            if *has_owner {
                text.push_str(&format!("owner{}@x.com\n", level));
            }
            if !text.is_empty() {
                repo.write_file("p", "main", &format!("{}OWNERS", folder(level)), &text);
            }
        }
        repo.write_file("p", "main", &format!("{}file.txt", folder(depth)), "");

        let cutoff = levels.iter().rposition(|(_, no_parent)| *no_parent).unwrap_or(0);
        let expected: BTreeSet<String> = levels
            .iter()
            .enumerate()
            .filter(|(level, (has_owner, _))| *level >= cutoff && *has_owner)
            .map(|(level, _)| format!("owner{}@x.com", level))
            .collect();

        let (actual, _) = owner_refs(&repo, &format!("{}file.txt", folder(depth)));
        prop_assert_eq!(actual, expected);
    }

    /// Declaring more owners at the root never takes owners away from a
    /// path, whatever the folders below declare.
    #[test]
    fn test_root_owners_never_remove_owners(
        levels in prop::collection::vec(
            (any::<bool>(), any::<bool>(), prop::option::of("[a-z]{1,3}\\.(md|rs)")),
            1..5,
        ),
        root_pattern in prop::option::of("[a-z]{1,3}\\.(md|rs)"),
        file in "[a-z]{1,3}\\.(md|rs)",
    ) {
        let repo = InMemoryRepo::new();
        let depth = levels.len();
        for (index, (has_owner, no_parent, pattern)) in levels.iter().enumerate() {
            let level = index + 1;
            let mut text = String::new();
            if *no_parent {
                text.push_str("set noparent\n");
            }
            if *has_owner {
                text.push_str(&format!("owner{}@x.com\n", level));
            }
            if let Some(pattern) = pattern {
                text.push_str(&format!("per-file {}=scoped{}@x.com\n", pattern, level));
            }
            if !text.is_empty() {
                repo.write_file("p", "main", &format!("{}OWNERS", folder(level)), &text);
            }
        }
        let path = format!("{}{}", folder(depth), file);
        repo.write_file("p", "main", "/OWNERS", "root@x.com\n");
        let (before, _) = owner_refs(&repo, &path);

        let added = match &root_pattern {
            Some(pattern) => format!("root@x.com\nper-file {}=extra@x.com\n", pattern),
            None => "root@x.com\nextra@x.com\n".to_owned(),
        };
        repo.write_file("p", "main", "/OWNERS", &added);
        let (after, _) = owner_refs(&repo, &path);

        prop_assert!(before.is_subset(&after), "{:?} is not a subset of {:?}", before, after);
    }

    /// Arbitrary import graphs, cycles included, resolve to the owners of
    /// every config reachable from the importing one.
    #[test]
    fn test_imports_resolve_to_reachable_configs(
        edges in prop::collection::vec(prop::collection::vec(0..5usize, 0..4), 5),
    ) {
        let repo = InMemoryRepo::new();
        for (node, targets) in edges.iter().enumerate() {
            let mut text = format!("owner{}@x.com\n", node);
            for target in targets {
                text.push_str(&format!("include /f{}/OWNERS\n", target));
            }
            repo.write_file("p", "main", &format!("/f{}/OWNERS", node), &text);
        }

        let mut reachable = BTreeSet::from([0]);
        let mut pending = vec![0];
        while let Some(node) = pending.pop() {
            for &target in &edges[node] {
                if reachable.insert(target) {
                    pending.push(target);
                }
            }
        }
        let expected: BTreeSet<String> =
            reachable.iter().map(|node| format!("owner{}@x.com", node)).collect();

        let (actual, resolved) = owner_refs(&repo, "/f0/x.txt");
        prop_assert_eq!(actual, expected);
        prop_assert!(resolved
            .unresolved_imports
            .iter()
            .all(|unresolved| unresolved.reason == code_owners::UnresolvedReason::Cycle));
    }

    /// Owner sets with path expressions never leak through an import of
    /// global owner sets only.
    #[test]
    fn test_global_only_imports_skip_per_file_owners(
        patterns in prop::collection::vec("[a-z]{1,4}\\.(md|txt|rs)", 1..4),
        file in "[a-z]{1,4}\\.(md|txt|rs)",
    ) {
        let repo = InMemoryRepo::new();
        repo.write_file("p", "main", "/a/OWNERS", "file: /lib/OWNERS\n");
        let mut text = "global@x.com\n".to_owned();
        for pattern in &patterns {
            text.push_str(&format!("per-file {}=scoped@x.com\n", pattern));
        }
        repo.write_file("p", "main", "/lib/OWNERS", &text);

        let (actual, _) = owner_refs(&repo, &format!("/a/{}", file));
        prop_assert_eq!(actual, BTreeSet::from(["global@x.com".to_owned()]));
    }

    /// A current override approval approves the path whatever else holds.
    #[test]
    fn test_override_approval_takes_precedence(
        owners in prop::collection::btree_set(1..6u32, 0..4),
        approvals in prop::collection::vec(
            (1..7u32, prop::bool::ANY, -2..=2i16, 1..=2u32),
            0..6,
        ),
        all_users in any::<bool>(),
    ) {
        let settings = CodeOwnersSettings {
            override_approvals: vec![RequiredApproval::new("Owners-Override", 1)],
            ..CodeOwnersSettings::default()
        }
        .for_branch("main")
        .unwrap();
        let labels = [
            LabelDefinition::new("Code-Review", -2, 2),
            LabelDefinition::new("Owners-Override", -1, 1),
        ];
        let policy = ApprovalPolicy::new(&settings, &labels).unwrap();

        let approvals: Vec<Approval> = approvals
            .into_iter()
            .map(|(account, is_override, value, patch_set)| {
                let label = if is_override { "Owners-Override" } else { "Code-Review" };
                let value = if is_override { value.clamp(-1, 1) } else { value };
                Approval::new(AccountId(account), label, value, patch_set)
            })
            .collect();
        let resolved = ResolvedOwners {
            path: "/x.txt".to_owned(),
            accounts: owners.iter().map(|&id| AccountId(id)).collect(),
            owned_by_all_users: all_users,
            ..ResolvedOwners::default()
        };
        let change = ChangeState {
            project: "p".to_owned(),
            branch: "main".to_owned(),
            current_patch_set: 2,
            base_revision: None,
            owner: AccountId(100),
            uploader: AccountId(100),
            is_pure_revert: false,
            reviewers: BTreeSet::new(),
            approvals: approvals.clone(),
        };

        let current = |approval: &&Approval| approval.patch_set == 2;
        let overridden = approvals
            .iter()
            .filter(current)
            .any(|a| a.label == "Owners-Override" && a.value >= 1);
        let owner_approved = approvals.iter().filter(current).any(|a| {
            a.label == "Code-Review"
                && a.value >= 1
                && (all_users || resolved.accounts.contains(&a.account))
        });

        let status = policy.classify(&resolved, &change).status;
        if overridden || owner_approved {
            prop_assert_eq!(status, CodeOwnerStatus::Approved);
        } else if all_users || !owners.is_empty() {
            prop_assert_eq!(status, CodeOwnerStatus::Pending);
        } else {
            prop_assert_eq!(status, CodeOwnerStatus::InsufficientReviewers);
        }
    }
}
