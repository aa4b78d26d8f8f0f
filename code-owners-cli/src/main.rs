mod accounts;
mod config;
mod fs_store;

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use code_owners::{
    status::{Deadline, Page},
    BackendConfigLoader, ChangeDiff, ChangeState, CodeOwnerResolver, ConfigValidator,
    RequestCache, ResolvedOwners, Severity, StatusComputation,
};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::{
    accounts::InterningAccounts,
    config::Config,
    fs_store::{repo_path, walk_files, FsStore},
};

#[derive(Parser)]
#[command(version, about = "Code owners of files in a working tree")]
struct Cli {
    /// Root of the working tree.
    #[arg(short = 'C', long, default_value = ".")]
    repo: PathBuf,

    /// Config file with settings, labels and accounts.
    #[arg(short = 'c', long = "config")]
    config_file: Option<PathBuf>,

    #[arg(long, default_value = "local")]
    project: String,

    /// Branch the working tree is a checkout of.
    #[arg(long, default_value = "main")]
    branch: String,

    /// Working tree of the refs/meta/config branch, for default owners.
    #[arg(long)]
    meta_config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the code owners of files.
    Owners {
        /// Files or directories, relative to the working tree root.
        paths: Vec<PathBuf>,
    },
    /// Check every owner config file of the working tree.
    Validate,
    /// Compute the code owner status of a change described by a JSON file.
    Status {
        #[arg(long)]
        change: PathBuf,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long)]
        limit: Option<usize>,
        /// Give up after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

/// Input of the `status` command.
#[derive(Deserialize)]
struct ChangeInput {
    change: ChangeState,
    diff: ChangeDiff,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        match &self.config_file {
            Some(path) => Config::load(path),
            None => Ok(Config::default()),
        }
    }

    fn store(&self) -> FsStore {
        let store = FsStore::new(self.project.as_str()).with_branch(&self.branch, &self.repo);
        match &self.meta_config {
            Some(root) => store.with_branch(code_owners::settings::DEFAULT_CONFIG_BRANCH, root),
            None => store,
        }
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let store = cli.store();
    let accounts = InterningAccounts::new(&config.accounts, &config.inactive_accounts);

    match &cli.command {
        Command::Owners { paths } => print_owners(&cli, &config, &store, &accounts, paths),
        Command::Validate => validate(&cli, &config, &store, &accounts),
        Command::Status {
            change,
            start,
            limit,
            timeout,
        } => {
            let page = Page {
                start: *start,
                limit: *limit,
            };
            let deadline = timeout.map(|secs| Deadline::after(Duration::from_secs(secs)));
            print_status(&config, &store, &accounts, change, page, deadline)
        }
    }
}

fn print_owners(
    cli: &Cli,
    config: &Config,
    store: &FsStore,
    accounts: &InterningAccounts,
    paths: &[PathBuf],
) -> Result<ExitCode> {
    config.settings.validate(&config.labels)?;
    let settings = config.settings.for_branch(&cli.branch)?;
    let loader = BackendConfigLoader::new(store, settings.backend.clone());
    let cache = RequestCache::new(&loader);
    let resolver = CodeOwnerResolver::new(cli.project.as_str(), &cache, store, accounts, &settings);

    let roots = if paths.is_empty() {
        vec![cli.repo.clone()]
    } else {
        paths.iter().map(|path| cli.repo.join(path)).collect()
    };
    let mut files = Vec::new();
    for root in roots {
        if !root.exists() {
            eprintln!("error: path does not exist: {}", root.display());
            continue;
        }
        if root.is_dir() {
            for entry in walk_files(&root) {
                if let Some(path) = repo_path(&cli.repo, entry?.path()) {
                    files.push(path);
                }
            }
        } else if let Some(path) = repo_path(&cli.repo, &root) {
            files.push(path);
        }
    }
    info!(files = files.len(), "resolving code owners");

    #[cfg(feature = "rayon")]
    let iter = files.par_iter();
    #[cfg(not(feature = "rayon"))]
    let iter = files.iter();
    let resolved: Vec<ResolvedOwners> = iter
        .map(|path| resolver.resolve_path_owners(path, None))
        .collect::<Result<_, _>>()?;
    debug!(configs = cache.len(), "cached code owner configs");

    for owners in &resolved {
        println!("{:<70}  {}", owners.path, describe_owners(owners));
    }
    Ok(ExitCode::SUCCESS)
}

fn describe_owners(owners: &ResolvedOwners) -> String {
    if owners.is_default_owner {
        return "(all users, by fallback)".to_owned();
    }
    if owners.owner_refs.is_empty() {
        return "(unowned)".to_owned();
    }
    owners
        .owner_refs
        .iter()
        .map(|owner| owner.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn validate(
    cli: &Cli,
    config: &Config,
    store: &FsStore,
    accounts: &InterningAccounts,
) -> Result<ExitCode> {
    config.settings.validate(&config.labels)?;
    let settings = config.settings.for_branch(&cli.branch)?;
    let reports = ConfigValidator::new(cli.project.as_str(), store, store, accounts, &settings)
        .validate_branch(None)?;

    let mut failed = false;
    for report in &reports {
        for issue in &report.issues {
            let severity = match issue.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            println!("{}: {}", severity, issue.message);
        }
        failed |= report.has_errors();
    }
    info!(files = reports.len(), failed, "validated code owner configs");
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_status(
    config: &Config,
    store: &FsStore,
    accounts: &InterningAccounts,
    change_file: &Path,
    page: Page,
    deadline: Option<Deadline>,
) -> Result<ExitCode> {
    let source = fs::read_to_string(change_file)
        .with_context(|| format!("cannot read change file {}", change_file.display()))?;
    let input: ChangeInput = serde_json::from_str(&source)
        .with_context(|| format!("invalid change file {}", change_file.display()))?;
    if input.diff.files.is_empty() {
        bail!("the change modifies no files");
    }

    let report = StatusComputation::new(store, store, accounts, &config.settings, &config.labels)
        .compute_statuses(&input.change, &input.diff, page, deadline)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.is_submittable() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
