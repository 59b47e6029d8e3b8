//! Hostr CLI
//!
//! Maintenance commands over the bridge's persisted state, plus a replay
//! harness that runs the full bridge against in-memory networks.
//!
//! ## Usage
//!
//! ```bash
//! # Ledger sizes and rate state
//! hostr status
//!
//! # Drop ledger entries past the retention window
//! hostr prune
//!
//! # Would this text be bridged?
//! hostr check "gm #nobridge"
//!
//! # Show what the bridge would post
//! hostr render --to hive --file note.md
//! hostr render --to nostr --kind long --id my-post --file post.md
//!
//! # Validate credentials and print effective settings
//! hostr config --settings settings.json
//!
//! # Run the bridge over a fixture
//! hostr replay fixtures/both_directions.json
//! ```

mod replay;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use hostr_core::config::{
    ENV_HIVE_POSTING_KEY, ENV_HIVE_USERNAME, ENV_NOSTR_PRIVATE_KEY, ENV_NOSTR_PUBLIC_KEY,
};
use hostr_core::ledger::{TO_PLATFORM_LEDGER_FILE, TO_RELAY_LEDGER_FILE};
use hostr_core::logging::LoggingBuilder;
use hostr_core::rate::{read_rate_state, RATE_STATE_FILE};
use hostr_core::transform::{generate_title, opt_out_keyword, MarkerSubject};
use hostr_core::{
    BridgeSettings, ContentKind, ContentTransform, Credentials, Direction, MarkerSet,
    PlatformRoute, ProcessedLedger, QueueItem, RelayRoute, KIND_NOTE,
};
use tracing::info;

/// Hostr - Nostr/Hive cross-posting bridge
#[derive(Parser)]
#[command(name = "hostr")]
#[command(version)]
#[command(about = "Hostr - Nostr/Hive cross-posting bridge")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// State directory (default: ~/.hostr/state)
    #[arg(short, long, global = true)]
    state_dir: Option<PathBuf>,

    /// JSON settings file; missing keys keep their defaults
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Also write JSONL logs under this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show ledger sizes and persisted rate state
    Status,

    /// Remove ledger entries older than the retention window
    Prune,

    /// Report whether text carries a loop marker or opt-out keyword
    Check {
        /// Text to inspect
        text: Option<String>,
        /// Read the text from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the body the bridge would post
    Render {
        /// Destination network
        #[arg(long, value_enum)]
        to: Target,
        /// Source text
        text: Option<String>,
        /// Read the source text from a file instead
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Source id: Nostr event id or Hive permlink
        #[arg(long)]
        id: Option<String>,
        /// Force the length class instead of classifying the text
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Title of the source Hive post
        #[arg(long)]
        title: Option<String>,
        /// Hive author for links (default: $HIVE_USERNAME)
        #[arg(long)]
        author: Option<String>,
    },

    /// Validate credentials and print effective settings
    Config,

    /// Run the bridge against in-memory networks seeded from a fixture
    Replay {
        /// Fixture file (JSON)
        fixture: PathBuf,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Hive,
    Nostr,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Short,
    Long,
}

impl From<KindArg> for ContentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Short => ContentKind::Short,
            KindArg::Long => ContentKind::Long,
        }
    }
}

/// Get the default state directory (~/.hostr/state)
fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hostr")
        .join("state")
}

fn load_settings(path: Option<&Path>) -> Result<BridgeSettings> {
    let settings = match path {
        Some(path) => BridgeSettings::from_file(path)?,
        None => BridgeSettings::default(),
    };
    settings.validate()?;
    Ok(settings)
}

/// Text from the positional argument or `--file`.
fn input_text(text: Option<String>, file: Option<&Path>) -> Result<String> {
    match (text, file) {
        (Some(_), Some(_)) => bail!("Give either TEXT or --file, not both"),
        (Some(text), None) => Ok(text),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => bail!("Nothing to read: give TEXT or --file"),
    }
}

fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    match secs {
        s if s < 120 => format!("{}s ago", s),
        s if s < 7200 => format!("{}m ago", s / 60),
        s if s < 172_800 => format!("{}h ago", s / 3600),
        s => format!("{}d ago", s / 86_400),
    }
}

fn print_ledger(direction: Direction, ledger: &ProcessedLedger, now: DateTime<Utc>) {
    println!("{} ledger ({}):", direction, ledger.path().display());
    println!("  Entries: {}", ledger.len());
    match ledger.oldest() {
        Some((id, seen)) => println!("  Oldest: {} ({})", id, format_age(seen, now)),
        None => println!("  Oldest: (empty)"),
    }
}

fn print_status(state_dir: &Path) -> Result<()> {
    let now = Utc::now();
    println!("State directory: {}", state_dir.display());
    println!();

    let to_platform = ProcessedLedger::load_from_disk(state_dir.join(TO_PLATFORM_LEDGER_FILE), now)?;
    let to_relay = ProcessedLedger::load_from_disk(state_dir.join(TO_RELAY_LEDGER_FILE), now)?;
    print_ledger(Direction::ToPlatform, &to_platform, now);
    print_ledger(Direction::ToRelay, &to_relay, now);
    println!();

    println!("Rate state:");
    match read_rate_state(&state_dir.join(RATE_STATE_FILE))? {
        Some(state) => {
            match state.last_post_at {
                Some(at) => println!("  Last Hive write: {} ({})", at.to_rfc3339(), format_age(at, now)),
                None => println!("  Last Hive write: never"),
            }
            match state.day_key {
                Some(day) => println!("  Day: {}", day),
                None => println!("  Day: (none)"),
            }
            for (category, count) in &state.daily_counts {
                println!("  {}: {}", category, count);
            }
        }
        None => println!("  (no writes recorded)"),
    }
    Ok(())
}

fn prune(state_dir: &Path, settings: &BridgeSettings) -> Result<()> {
    let now = Utc::now();
    let retention = settings.retention();
    for (direction, file) in [
        (Direction::ToPlatform, TO_PLATFORM_LEDGER_FILE),
        (Direction::ToRelay, TO_RELAY_LEDGER_FILE),
    ] {
        let mut ledger = ProcessedLedger::load_from_disk(state_dir.join(file), now)?;
        let removed = ledger.prune_expired(now, retention)?;
        info!(direction = direction.label(), removed, "Pruned ledger");
        println!("{}: pruned {}, kept {}", direction, removed, ledger.len());
    }
    Ok(())
}

fn check(text: &str, settings: &BridgeSettings) {
    let marker = MarkerSet::standard().detect(&MarkerSubject::text(text));
    let keyword = opt_out_keyword(text, &settings.do_not_bridge);

    println!("Loop marker: {}", marker.unwrap_or("none"));
    println!("Opt-out keyword: {}", keyword.unwrap_or("none"));
    if marker.is_some() || keyword.is_some() {
        println!("Verdict: not bridged");
    } else {
        println!("Verdict: bridged");
    }
}

struct RenderRequest {
    to: Target,
    content: String,
    id: Option<String>,
    kind: Option<ContentKind>,
    title: Option<String>,
    author: Option<String>,
}

fn render(request: RenderRequest, settings: &BridgeSettings) -> Result<()> {
    let transform = ContentTransform::from_settings(settings);
    let now = Utc::now();

    match request.to {
        Target::Hive => {
            let kind = request
                .kind
                .unwrap_or_else(|| transform.classify_event(KIND_NOTE, &request.content));
            let item = QueueItem {
                source_id: request.id.unwrap_or_else(|| "0".repeat(64)),
                content: request.content,
                kind,
                tags: Vec::new(),
                title: None,
                author: String::new(),
                created_at: now,
                enqueued_at: now,
                attempts: 0,
            };
            match settings.routing.platform_route(kind) {
                PlatformRoute::Venue => {
                    println!("Route: snap under venue container");
                    println!();
                    println!("{}", transform.snap_body(&item));
                }
                PlatformRoute::TopLevel => {
                    println!("Route: top-level post in {}", settings.longform_parent);
                    println!("Title: {}", generate_title(&item.content, &item.tags));
                    println!();
                    println!("{}", transform.longform_body(&item));
                }
            }
        }
        Target::Nostr => {
            let title = request.title.unwrap_or_default();
            let kind = request
                .kind
                .unwrap_or_else(|| transform.classify_post(&title, &request.content));
            let author = match request.author {
                Some(author) => author,
                None => std::env::var(ENV_HIVE_USERNAME).unwrap_or_else(|_| "author".to_string()),
            };
            let item = QueueItem {
                source_id: request.id.unwrap_or_else(|| "post".to_string()),
                content: request.content,
                kind,
                tags: Vec::new(),
                title: (!title.trim().is_empty()).then(|| title.trim().to_string()),
                author,
                created_at: now,
                enqueued_at: now,
                attempts: 0,
            };
            match settings.routing.relay_route(kind) {
                RelayRoute::Note => {
                    let note = transform.note_content(&item)?;
                    println!(
                        "Route: kind {} note{}",
                        KIND_NOTE,
                        if note.truncated { " (truncated)" } else { "" }
                    );
                    println!();
                    println!("{}", note.text);
                }
                RelayRoute::Article => {
                    let draft = transform.article_draft(&item, now);
                    println!("Route: kind {} article", draft.kind);
                    for tag in draft.tags.iter().filter(|t| t.len() > 1) {
                        if matches!(tag[0].as_str(), "title" | "summary") {
                            println!("{}: {}", tag[0], tag[1]);
                        }
                    }
                    println!();
                    println!("{}", draft.content);
                }
            }
        }
    }
    Ok(())
}

fn print_config(state_dir: &Path, settings: &BridgeSettings) -> Result<()> {
    let credentials = Credentials::from_env()?;

    println!("Credentials:");
    println!("  {}: {}", ENV_HIVE_USERNAME, credentials.hive_username);
    println!("  {}: {:?}", ENV_HIVE_POSTING_KEY, credentials.hive_posting_key);
    println!("  {}: {}", ENV_NOSTR_PUBLIC_KEY, credentials.nostr_public_key);
    println!("  {}: {:?}", ENV_NOSTR_PRIVATE_KEY, credentials.nostr_private_key);
    println!();
    println!("State directory: {}", state_dir.display());
    println!();
    println!("Settings:");
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

async fn run_replay(
    fixture_path: &Path,
    state_dir: &Path,
    settings: BridgeSettings,
    timeout: Duration,
) -> Result<()> {
    let fixture = replay::Fixture::load(fixture_path)?;

    // Replays never share ledgers with a real bridge or an earlier replay
    let replay_dir = state_dir.join("replay");
    if replay_dir.exists() {
        std::fs::remove_dir_all(&replay_dir)
            .with_context(|| format!("Failed to clear {}", replay_dir.display()))?;
    }
    std::fs::create_dir_all(&replay_dir)?;

    println!("Replaying {}", fixture_path.display());
    println!();
    let report = replay::run(&fixture, settings, replay_dir, timeout).await?;

    println!();
    println!("Hive writes: {}", report.platform_writes.len());
    for op in &report.platform_writes {
        if op.parent_author.is_empty() {
            println!("  @{}/{} (top-level in {})", op.author, op.permlink, op.parent_permlink);
            println!("    Title: {}", op.title);
        } else {
            println!(
                "  @{}/{} (reply to @{}/{})",
                op.author, op.permlink, op.parent_author, op.parent_permlink
            );
        }
        for line in op.body.lines() {
            println!("    | {}", line);
        }
    }

    println!();
    println!("Nostr events: {}", report.relay_events.len());
    for signed in &report.relay_events {
        println!("  kind {} {}", signed.event.kind, signed.event.id);
        for line in signed.event.content.lines() {
            println!("    | {}", line);
        }
    }

    println!();
    for direction in [Direction::ToPlatform, Direction::ToRelay] {
        let stats = report.status.queue(direction);
        println!(
            "{}: accepted {}, posted {}, rejected {}, retries {}, pending {}",
            direction, stats.accepted, stats.posted, stats.rejected, stats.retries, stats.depth
        );
    }

    if !report.settled {
        bail!("Replay did not settle within {}s", timeout.as_secs());
    }
    println!("Settled");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = LoggingBuilder::new("hostr")
        .verbosity(cli.verbose)
        .logs_dir(cli.log_dir.clone())
        .init()
        .context("Failed to set up logging")?;
    if let Some(path) = log_file {
        info!(path = %path.display(), "Writing JSONL logs");
    }

    let state_dir = cli.state_dir.unwrap_or_else(default_state_dir);
    let settings = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Status => print_status(&state_dir)?,

        Commands::Prune => prune(&state_dir, &settings)?,

        Commands::Check { text, file } => {
            let text = input_text(text, file.as_deref())?;
            check(&text, &settings);
        }

        Commands::Render {
            to,
            text,
            file,
            id,
            kind,
            title,
            author,
        } => {
            let content = input_text(text, file.as_deref())?;
            render(
                RenderRequest {
                    to,
                    content,
                    id,
                    kind: kind.map(ContentKind::from),
                    title,
                    author,
                },
                &settings,
            )?;
        }

        Commands::Config => print_config(&state_dir, &settings)?,

        Commands::Replay { fixture, timeout } => {
            run_replay(&fixture, &state_dir, settings, Duration::from_secs(timeout)).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "0s ago");
        assert_eq!(format_age(now - chrono::Duration::minutes(5), now), "5m ago");
        assert_eq!(format_age(now - chrono::Duration::hours(3), now), "3h ago");
        assert_eq!(format_age(now - chrono::Duration::days(3), now), "3d ago");
    }

    #[test]
    fn test_input_text_requires_one_source() {
        assert!(input_text(None, None).is_err());
        assert!(input_text(Some("a".into()), Some(Path::new("b"))).is_err());
        assert_eq!(input_text(Some("a".into()), None).unwrap(), "a");
    }
}
