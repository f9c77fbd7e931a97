//! StallSync command-line tool.
//!
//! Loads a scenario file (a JSON array of scanner stall reports) into a
//! fresh registry and lets you list and inspect the issues, preview
//! resolution plans, and apply them against the dry-run transfer engine.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use stallsync_core::config::EngineConfig;
use stallsync_core::models::{IssueId, Side, SideInfo};
use stallsync_core::registry::{IssueFilter, OutcomeSummary, Registry};
use stallsync_core::stall::{
    ActionSet, Classifier, IssueRecord, Plan, Planner, ResolutionAction, StallReason, StallReport,
};
use stallsync_core::{BatchApplier, DryRunEngine};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// StallSync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "stallsync",
    version,
    about = "Inspect stalled sync issues and plan or apply their resolutions"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override: trace, debug, info, warn, error.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./stallsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// List the issues of a scenario, most recently reported first.
    List {
        /// Scenario file: a JSON array of stall reports.
        scenario: PathBuf,

        /// Only show unsolved issues.
        #[arg(long)]
        unsolved: bool,
    },

    /// Show one issue with its legal actions.
    Show {
        scenario: PathBuf,

        /// Issue ID.
        id: String,
    },

    /// Preview the plan for one issue without applying it.
    Plan {
        scenario: PathBuf,

        /// Issue ID.
        id: String,

        /// Action to plan; repeat to combine composable actions.
        #[arg(short, long = "action", required = true)]
        actions: Vec<ResolutionAction>,
    },

    /// Apply a resolution against the dry-run engine.
    Apply {
        scenario: PathBuf,

        /// Issue IDs to resolve.
        #[arg(long = "id", required = true)]
        ids: Vec<String>,

        /// Action to apply; repeat to combine composable actions.
        #[arg(short, long = "action", required = true)]
        actions: Vec<ResolutionAction>,

        /// Also resolve every issue similar to the selected ones.
        #[arg(long)]
        similar: bool,

        /// Make an engine op fail, as `<issue-id>#<op-index>`.
        #[arg(long = "fail-op")]
        fail_ops: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { output } = &cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("warn"));
        return cmd_init(output);
    }
    if let Commands::Validate = cli.command {
        init_logging(cli.log_level.as_deref().unwrap_or("warn"));
        let path = cli
            .config
            .as_deref()
            .context("validate needs --config <path>")?;
        return cmd_validate(path);
    }

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    match cli.command {
        Commands::List { scenario, unsolved } => {
            let registry = load_scenario(&scenario, &config)?;
            cmd_list(&registry, unsolved)
        }
        Commands::Show { scenario, id } => {
            let registry = load_scenario(&scenario, &config)?;
            cmd_show(&registry, &IssueId::new(id))
        }
        Commands::Plan {
            scenario,
            id,
            actions,
        } => {
            let registry = load_scenario(&scenario, &config)?;
            cmd_plan(&registry, &config, &IssueId::new(id), &actions)
        }
        Commands::Apply {
            scenario,
            ids,
            actions,
            similar,
            fail_ops,
        } => {
            let registry = Arc::new(load_scenario(&scenario, &config)?);
            let ids: Vec<IssueId> = ids.into_iter().map(IssueId::new).collect();
            cmd_apply(registry, &config, &ids, &actions, similar, &fail_ops).await
        }
        Commands::Init { .. } | Commands::Validate => Ok(()),
    }
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Loading helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        config.validate().context("invalid default configuration")?;
        return Ok(config);
    };
    EngineConfig::load_and_validate(path).context("failed to load configuration file")
}

fn read_reports(path: &Path) -> Result<Vec<StallReport>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse scenario {}", path.display()))
}

fn load_scenario(path: &Path, config: &EngineConfig) -> Result<Registry> {
    let registry = Registry::new(&config.registry);
    for (index, report) in read_reports(path)?.into_iter().enumerate() {
        registry
            .report_stall(report)
            .with_context(|| format!("report #{} in {} is invalid", index, path.display()))?;
    }
    debug!(issues = registry.len()?, "scenario loaded");
    Ok(registry)
}

fn action_set(actions: &[ResolutionAction]) -> ActionSet {
    actions.iter().copied().collect()
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# StallSync Configuration

[logging]
level = "info"

[registry]
event_capacity = 256

[resolution]
# Which copy survives "remove duplicated": "oldest" or "newest".
duplicate_survivor = "oldest"
max_rename_suffix = 9999
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!(
        "Validate with: stallsync validate --config {}",
        output.display()
    );
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        EngineConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.apply_env_overrides();
    match config.validate() {
        Ok(()) => println!("  [OK] All values are in range"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Log level          : {}", config.logging.level);
    println!("  Event capacity     : {}", config.registry.event_capacity);
    println!("  Duplicate survivor : {}", config.resolution.duplicate_survivor);
    println!("  Max rename suffix  : {}", config.resolution.max_rename_suffix);
    println!();
    println!("Configuration is valid.");
    Ok(())
}

fn cmd_list(registry: &Registry, unsolved: bool) -> Result<()> {
    let filter = if unsolved {
        IssueFilter::unsolved()
    } else {
        IssueFilter::all()
    };
    let issues = registry
        .list_issues(&filter)
        .context("failed to list issues")?;

    if issues.is_empty() {
        println!("No issues found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Reason", "Path", "State", "Legal actions"]);

    for issue in &issues {
        table.add_row(vec![
            Cell::new(truncate(issue.id.as_str(), 40)),
            Cell::new(issue.reason),
            Cell::new(truncate(&display_path(issue), 48)),
            Cell::new(issue.solved),
            Cell::new(Classifier::legal_actions(issue)),
        ]);
    }

    println!("{}", table);
    println!("{} issue(s) shown", issues.len());
    Ok(())
}

fn cmd_show(registry: &Registry, id: &IssueId) -> Result<()> {
    let issue = registry.snapshot(id).context("lookup failed")?;

    println!("Issue: {}", issue.id);
    println!("======={}", "=".repeat(issue.id.as_str().len()));
    println!();
    println!("  Reason       : {}", issue.reason);
    println!("  State        : {}", issue.solved);
    println!("  Reported at  : {}", issue.reported_at.to_rfc3339());
    println!("  Content hash : {}", issue.content_hash());
    print_side("Local", issue.local.as_ref());
    print_side("Cloud", issue.cloud.as_ref());
    println!("  Legal actions: {}", Classifier::legal_actions(&issue));
    println!("  Description  : {}", Classifier::describe(&issue));

    if let Some(names) = &issue.name_conflict {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            "Side", "Name", "Locator", "Kind", "Fingerprint", "Modified", "Duplicate", "Outcome",
        ]);
        for side in [Side::Local, Side::Cloud] {
            for name in names.names(side) {
                table.add_row(vec![
                    Cell::new(side),
                    Cell::new(&name.name),
                    Cell::new(&name.locator),
                    Cell::new(if name.is_file { "file" } else { "folder" }),
                    Cell::new(name.fingerprint.as_ref().map_or("-", |f| f.as_str())),
                    Cell::new(name.modified_time),
                    Cell::new(
                        name.duplicate_group_id
                            .map_or_else(|| "-".to_string(), |g| format!("group {}", g)),
                    ),
                    Cell::new(format!("{:?}", name.solved)),
                ]);
            }
        }
        println!();
        println!("{}", table);
    }
    Ok(())
}

fn cmd_plan(
    registry: &Registry,
    config: &EngineConfig,
    id: &IssueId,
    actions: &[ResolutionAction],
) -> Result<()> {
    let issue = registry.snapshot(id).context("lookup failed")?;
    let plan = Planner::plan(&issue, action_set(actions), &config.plan_params())
        .with_context(|| format!("failed to plan {} for {}", action_set(actions), id))?;
    print_plan(&plan);
    Ok(())
}

async fn cmd_apply(
    registry: Arc<Registry>,
    config: &EngineConfig,
    ids: &[IssueId],
    actions: &[ResolutionAction],
    similar: bool,
    fail_ops: &[String],
) -> Result<()> {
    let engine = Arc::new(DryRunEngine::new());
    for raw in fail_ops {
        let (id, index) = parse_fail_op(raw)?;
        engine.fail_op(id, index);
    }
    let applier = BatchApplier::new(registry.clone(), engine);

    let mut selection = registry.select(ids).context("selection failed")?;
    if similar {
        selection = registry
            .similar_to(&selection)
            .context("failed to expand selection")?;
    }
    println!("Selected {} issue(s)", selection.len());

    let result = applier
        .apply(&selection, action_set(actions), &config.plan_params())
        .context("apply failed")?;
    for plan in &result.plans {
        print_plan(plan);
    }
    if !result.propagated.is_empty() {
        println!("Also solved by propagation:");
        for id in &result.propagated {
            println!("  {}", id);
        }
    }

    let outcome = result
        .completion
        .wait()
        .await
        .context("engine did not complete the batch")?;
    let summary = registry
        .apply_outcome(&outcome)
        .context("failed to record engine results")?;
    print_summary(&summary, &result.batch_id.to_string());
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_side(label: &str, side: Option<&SideInfo>) {
    let Some(side) = side else {
        return;
    };
    println!(
        "  {:<13}: {} ({}, {} bytes, modified {})",
        label, side.path, side.kind, side.size, side.modified_time
    );
}

fn print_plan(plan: &Plan) {
    println!();
    println!("Plan for {} [{}]", plan.issue_id, plan.actions);
    if plan.is_empty() {
        println!("  (nothing to do)");
        return;
    }
    for (index, op) in plan.ops.iter().enumerate() {
        println!("  {:>3}. {}", index, op);
    }
}

fn print_summary(summary: &OutcomeSummary, batch_id: &str) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Issue", "Result"]);
    for id in &summary.completed {
        table.add_row(vec![Cell::new(id), Cell::new("completed")]);
    }
    for id in &summary.rolled_back {
        table.add_row(vec![Cell::new(id), Cell::new("rolled back")]);
    }
    println!();
    println!("Batch {}", batch_id);
    println!("{}", table);
}

fn display_path(issue: &IssueRecord) -> String {
    if issue.reason == StallReason::NameConflict {
        if let Some(first) = issue
            .name_conflict
            .as_ref()
            .and_then(|n| n.cloud_names.first().or(n.local_names.first()))
        {
            return first.name.clone();
        }
    }
    issue
        .local
        .as_ref()
        .or(issue.cloud.as_ref())
        .map(|s| s.path.clone())
        .unwrap_or_default()
}

fn parse_fail_op(raw: &str) -> Result<(IssueId, usize)> {
    let (id, index) = raw
        .rsplit_once('#')
        .with_context(|| format!("invalid --fail-op '{}': expected <issue-id>#<op-index>", raw))?;
    let index = index
        .parse()
        .with_context(|| format!("invalid op index in --fail-op '{}'", raw))?;
    Ok((IssueId::new(id), index))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fail_op() {
        let (id, index) = parse_fail_op("node:00000000000000ab#2").unwrap();
        assert_eq!(id, IssueId::new("node:00000000000000ab"));
        assert_eq!(index, 2);
        assert!(parse_fail_op("no-index").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-much-longer-name", 8), "a-mu...");
    }

    #[test]
    fn test_load_scenario_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(
            &path,
            r#"[
                {
                    "reason": {"local_and_remote_differ": "changed_since_last_sync"},
                    "local": {"path": "/home/u/a.txt", "kind": "file", "size": 1},
                    "cloud": {"path": "/a.txt", "kind": "file", "size": 2, "handle": 7}
                },
                {
                    "reason": "sym_link",
                    "local": {"path": "/home/u/link", "kind": "file"}
                }
            ]"#,
        )
        .unwrap();

        let registry = load_scenario(&path, &EngineConfig::default()).unwrap();
        assert_eq!(registry.len().unwrap(), 2);
        let legal = registry
            .legal_actions(&IssueId::for_handle(7))
            .unwrap();
        assert!(legal.contains(ResolutionAction::ChooseLocal));
    }

    #[test]
    fn test_cli_parses_repeated_actions() {
        let cli = Cli::try_parse_from([
            "stallsync",
            "plan",
            "scenario.json",
            "cloud:/Docs",
            "--action",
            "remove-duplicated",
            "--action",
            "rename",
        ])
        .unwrap();
        let Commands::Plan { actions, .. } = cli.command else {
            panic!("expected plan command");
        };
        assert_eq!(
            action_set(&actions),
            ActionSet::single(ResolutionAction::RemoveDuplicated).with(ResolutionAction::Rename)
        );
    }
}
