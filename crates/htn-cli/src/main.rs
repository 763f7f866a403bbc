// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! `htn`: learn hierarchical task grammars from demonstration files.
//!
//! Demonstration files are JSON arrays of token arrays:
//! `[["init_state", "init_action", "s0", "a", ..., "term_state", "term_action"], ...]`.
//! Defaults come from `prefs.json` in the config directory; flags override them.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use htn_config::{FsPrefsStore, HtnPrefs, PrefsService};
use htn_core::analysis::{coverage, longest_walk, stats};
use htn_core::{
    learn, validate_demonstrations, CachedOracle, EquivalenceOracle, LearnOptions,
    LearnedGrammar, OracleFallback, Prng, ReductionStatus, Sampler, SimilarityOracle,
    StallReason, DEFAULT_SIMILARITY_THRESHOLD,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "htn",
    version,
    about = "Learn hierarchical task grammars from demonstrations",
    disable_help_subcommand = true
)]
struct Cli {
    /// Directory holding `prefs.json` (defaults to the platform config dir).
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Merge parallel actions whose labels are near-identical.
    #[arg(long, global = true)]
    similarity: bool,

    /// Override the reducer's round budget.
    #[arg(long, global = true)]
    max_rounds: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reduce demonstrations to a grammar and print it.
    Reduce(ReduceArgs),
    /// Draw plans from the learned grammar.
    Sample(SampleArgs),
    /// Check how many held-out demonstrations the grammar reproduces.
    Coverage(CoverageArgs),
    /// Print structural statistics of the learned grammar.
    Stats(StatsArgs),
    /// Print the effective preferences as JSON.
    Prefs(PrefsArgs),
}

#[derive(Args, Debug)]
struct ReduceArgs {
    /// Demonstration file (JSON).
    demos: PathBuf,
    /// Write the digest-checked CBOR export frame here.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Print the export tree as JSON instead of the text rendering.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SampleArgs {
    /// Demonstration file (JSON).
    demos: PathBuf,
    /// Number of plans to draw.
    #[arg(short = 'n', long)]
    count: Option<usize>,
    /// PRNG seed.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct CoverageArgs {
    /// Training demonstrations (JSON).
    train: PathBuf,
    /// Held-out demonstrations (JSON).
    heldout: PathBuf,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Demonstration file (JSON).
    demos: PathBuf,
}

#[derive(Args, Debug)]
struct PrefsArgs {
    /// Persist the effective preferences to the config directory.
    #[arg(long)]
    save: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let service = open_store(cli.config_dir.as_deref())?.map(PrefsService::new);
    let mut prefs = match &service {
        Some(service) => service.load().context("failed to load prefs")?,
        None => HtnPrefs::default(),
    };
    if let Some(rounds) = cli.max_rounds {
        prefs.reduction.max_rounds = rounds;
    }

    let mut out = std::io::stdout().lock();
    match cli.command {
        Commands::Reduce(args) => run_reduce(&mut out, &prefs, cli.similarity, &args),
        Commands::Sample(args) => run_sample(&mut out, &prefs, cli.similarity, &args),
        Commands::Coverage(args) => run_coverage(&mut out, &prefs, cli.similarity, &args),
        Commands::Stats(args) => run_stats(&mut out, &prefs, cli.similarity, &args),
        Commands::Prefs(args) => run_prefs(&mut out, &prefs, service.as_ref(), &args),
    }
}

fn open_store(dir: Option<&Path>) -> Result<Option<FsPrefsStore>> {
    match dir {
        Some(dir) => FsPrefsStore::at(dir)
            .map(Some)
            .with_context(|| format!("failed to open config dir {}", dir.display())),
        None => match FsPrefsStore::new() {
            Ok(store) => Ok(Some(store)),
            Err(err) => {
                warn!(%err, "no config directory; using default prefs");
                Ok(None)
            }
        },
    }
}

fn read_demos(path: &Path) -> Result<Vec<Vec<String>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a list of token arrays", path.display()))
}

fn learn_from(path: &Path, prefs: &HtnPrefs, similarity: bool) -> Result<LearnedGrammar> {
    let demos = read_demos(path)?;
    let fallback = prefs.fallback();
    let oracle = similarity.then(|| {
        let threshold = match fallback {
            OracleFallback::Similarity(t) => t,
            OracleFallback::NotEquivalent => DEFAULT_SIMILARITY_THRESHOLD,
        };
        let oracle: Box<dyn EquivalenceOracle> =
            Box::new(CachedOracle::new(SimilarityOracle::new(threshold)));
        (oracle, fallback)
    });
    let options = LearnOptions {
        sentinels: prefs.sentinels(),
        budget: prefs.budget(),
        oracle,
    };
    let learned = learn(&demos, options)
        .with_context(|| format!("failed to learn from {}", path.display()))?;
    info!(root = %learned.reduction.root, "learned grammar");
    Ok(learned)
}

fn status_line(status: ReductionStatus) -> String {
    match status {
        ReductionStatus::Complete => "status: complete".to_owned(),
        ReductionStatus::Stalled { reason, remaining } => {
            let reason = match reason {
                StallReason::NoProgress => "no progress",
                StallReason::BudgetExhausted => "budget exhausted",
            };
            format!("status: stalled ({reason}; {remaining} nodes in residual choice)")
        }
    }
}

fn run_reduce(
    out: &mut impl Write,
    prefs: &HtnPrefs,
    similarity: bool,
    args: &ReduceArgs,
) -> Result<()> {
    let learned = learn_from(&args.demos, prefs, similarity)?;
    let tree = learned.export()?;
    if args.json {
        serde_json::to_writer_pretty(&mut *out, &tree).context("failed to write JSON")?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", learned.render()?)?;
        writeln!(out, "{}", status_line(learned.reduction.status))?;
    }
    if let Some(path) = &args.out {
        let bytes = htn_export::encode_frame(&tree)?;
        std::fs::write(path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        let digest = htn_export::compute_hash(&tree)?;
        if !args.json {
            writeln!(
                out,
                "wrote {} ({} bytes, blake3 {})",
                path.display(),
                bytes.len(),
                htn_export::digest_hex(&digest)
            )?;
        }
    }
    Ok(())
}

fn run_sample(
    out: &mut impl Write,
    prefs: &HtnPrefs,
    similarity: bool,
    args: &SampleArgs,
) -> Result<()> {
    let learned = learn_from(&args.demos, prefs, similarity)?;
    let count = args.count.unwrap_or(prefs.sampler.count);
    let seed = args.seed.unwrap_or(prefs.sampler.seed);
    let mut sampler = Sampler::new(&learned.grammar, Prng::from_seed_u64(seed));
    for _ in 0..count {
        let plan = sampler.sample_actions(learned.reduction.root, &learned.sentinels)?;
        writeln!(out, "{}", plan.join(" "))?;
    }
    Ok(())
}

fn run_coverage(
    out: &mut impl Write,
    prefs: &HtnPrefs,
    similarity: bool,
    args: &CoverageArgs,
) -> Result<()> {
    let learned = learn_from(&args.train, prefs, similarity)?;
    let heldout = read_demos(&args.heldout)?;
    validate_demonstrations(&heldout, &learned.sentinels)
        .with_context(|| format!("malformed held-out file {}", args.heldout.display()))?;
    let report = coverage(&learned.grammar, learned.reduction.root, &heldout)?;
    writeln!(
        out,
        "accepted {}/{} ({:.1}%)",
        report.accepted,
        report.total,
        report.ratio() * 100.0
    )?;
    if !report.rejected.is_empty() {
        let rejected: Vec<String> = report.rejected.iter().map(ToString::to_string).collect();
        writeln!(out, "rejected: {}", rejected.join(", "))?;
    }
    Ok(())
}

fn run_stats(
    out: &mut impl Write,
    prefs: &HtnPrefs,
    similarity: bool,
    args: &StatsArgs,
) -> Result<()> {
    let learned = learn_from(&args.demos, prefs, similarity)?;
    let root = learned.reduction.root;
    let s = stats(&learned.grammar, root)?;
    let run = learned.reduction.stats;

    let mut table = Table::new();
    table.set_header(vec!["metric", "value"]);
    let rows: [(&str, String); 13] = [
        ("primitives", s.primitives.to_string()),
        ("sequences", s.sequences.to_string()),
        ("choices", s.choices.to_string()),
        ("nodes", s.nodes().to_string()),
        ("edges", s.edges.to_string()),
        ("depth", s.depth.to_string()),
        ("longest plan", longest_walk(&learned.grammar, root)?.to_string()),
        ("rounds", run.rounds.to_string()),
        ("series merges", run.series_merges.to_string()),
        ("parallel merges", run.parallel_merges.to_string()),
        ("expansions", run.expansions.to_string()),
        ("splits", run.splits.to_string()),
        ("canonical", learned.reduction.is_canonical().to_string()),
    ];
    for (metric, value) in rows {
        table.add_row(vec![Cell::new(metric), Cell::new(value)]);
    }
    writeln!(out, "{table}")?;
    Ok(())
}

fn run_prefs(
    out: &mut impl Write,
    prefs: &HtnPrefs,
    service: Option<&PrefsService<FsPrefsStore>>,
    args: &PrefsArgs,
) -> Result<()> {
    if args.save {
        let service = service.context("no config directory to save into")?;
        service.save(prefs).context("failed to save prefs")?;
        info!(path = %service.store().path().display(), "saved prefs");
    }
    serde_json::to_writer_pretty(&mut *out, prefs).context("failed to write JSON")?;
    writeln!(out)?;
    Ok(())
}
