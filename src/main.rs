//! prior: find past issues similar to a new one.
//!
//! ```bash
//! # Build or top up the index for a repository
//! prior sync --repo acme/widgets
//!
//! # Issues similar to #128, excluding itself
//! prior search --repo acme/widgets --issue 128
//!
//! # Free-form query
//! prior search --repo acme/widgets --query "crash on startup"
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use prior_core::{AppBuilder, Config};
use prior_index::format_markdown;

#[derive(Parser, Debug)]
#[command(name = "prior")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', global = true, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build or incrementally update a repository's index
    Sync(SyncArgs),

    /// Find issues similar to an existing issue or a query
    Search(SearchArgs),

    /// Delete documents from a repository's index by key
    Remove(RemoveArgs),
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Repository as owner/name
    #[arg(long, short = 'r')]
    repo: String,

    /// Rebuild the index even if the repository was indexed before
    #[arg(long)]
    force_refresh: bool,

    /// Override the number of newest issues considered
    #[arg(long)]
    max_issues: Option<usize>,
}

#[derive(Args, Debug)]
#[command(group(clap::ArgGroup::new("input").required(true).args(["issue", "query"])))]
struct SearchArgs {
    /// Repository as owner/name
    #[arg(long, short = 'r')]
    repo: String,

    /// Number of an existing issue to compare against
    #[arg(long, short = 'i')]
    issue: Option<u64>,

    /// Free-form text to compare against
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// Nearest neighbours to request before de-duplication
    #[arg(long, short = 'n')]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct RemoveArgs {
    /// Repository as owner/name
    #[arg(long, short = 'r')]
    repo: String,

    /// Document keys such as `issue_12.issue` or `issue_12.comment_0`
    #[arg(required = true)]
    keys: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_subscriber();

    let mut builder = AppBuilder::load(cli.config.as_deref())?;
    tracing::debug!(config = %builder.config_path().display(), "configuration loaded");

    apply_overrides(builder.config_mut(), &cli.command);
    builder.config().validate()?;
    let app = builder.build().await?;

    match cli.command {
        Command::Sync(args) => {
            let report = app
                .synchronizer
                .sync(&args.repo)
                .await
                .with_context(|| format!("sync of {} failed", args.repo))?;
            match cli.output {
                OutputFormat::Text => println!(
                    "{}: {} ({} new issues, {} documents indexed, {} skipped, {} zero-filled) in {}ms",
                    report.repo,
                    report.plan,
                    report.new_issues,
                    report.documents_indexed,
                    report.documents_skipped,
                    report.embedding_fallbacks,
                    report.duration_ms
                ),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Command::Search(args) => {
            let results = match (args.issue, args.query.as_deref()) {
                (Some(number), _) => {
                    app.searcher
                        .find_similar_to_issue(&args.repo, number)
                        .await?
                }
                (None, Some(query)) => app.searcher.find_similar(&args.repo, query, None).await?,
                (None, None) => anyhow::bail!("either --issue or --query is required"),
            };
            match cli.output {
                OutputFormat::Text => print!("{}", format_markdown(&results)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
            }
        }
        Command::Remove(args) => {
            let removed = app.synchronizer.remove(&args.repo, &args.keys).await?;
            match cli.output {
                OutputFormat::Text => println!("removed {removed} documents from {}", args.repo),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::json!({ "repo": args.repo, "removed": removed })
                ),
            }
        }
    }
    Ok(())
}

/// Fold command-line flags into the loaded configuration.
fn apply_overrides(config: &mut Config, command: &Command) {
    match command {
        Command::Sync(args) => {
            config.sync.force_refresh |= args.force_refresh;
            if let Some(n) = args.max_issues {
                config.sync.max_issues = n;
            }
        }
        Command::Search(args) => {
            if let Some(limit) = args.limit {
                config.search.limit = limit;
            }
        }
        Command::Remove(_) => {}
    }
}

/// `RUST_LOG` controls verbosity; logs go to stderr so stdout stays parseable.
fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn search_requires_issue_or_query() {
        assert!(Cli::try_parse_from(["prior", "search", "--repo", "acme/widgets"]).is_err());
        let cli = Cli::try_parse_from([
            "prior", "search", "--repo", "acme/widgets", "--issue", "12",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Search(SearchArgs { issue: Some(12), .. })));
    }

    #[test]
    fn sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "prior",
            "--config",
            "prior.toml",
            "sync",
            "-r",
            "acme/widgets",
            "--force-refresh",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("prior.toml")));
        let Command::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert!(args.force_refresh);
        assert_eq!(args.repo, "acme/widgets");
    }

    #[test]
    fn overrides_apply_before_validation() {
        let cli = Cli::try_parse_from([
            "prior", "sync", "-r", "acme/widgets", "--max-issues", "0",
        ])
        .unwrap();
        let mut config = Config::default();
        config.embedding.provider = prior_core::config::EmbeddingProvider::Ollama;
        config.validate().unwrap();
        apply_overrides(&mut config, &cli.command);
        assert_eq!(config.sync.max_issues, 0);
        assert!(config.validate().unwrap_err().to_string().contains("max_issues"));
    }

    #[test]
    fn remove_is_validated_like_other_commands() {
        let cli = Cli::try_parse_from(["prior", "remove", "-r", "acme/widgets", "issue_1.issue"])
            .unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &cli.command);
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), prior_index::ErrorKind::Configuration);
    }

    #[test]
    fn remove_needs_keys() {
        assert!(Cli::try_parse_from(["prior", "remove", "-r", "acme/widgets"]).is_err());
    }
}
