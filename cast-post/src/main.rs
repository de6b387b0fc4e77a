//! cast-post - Post a message or a reply thread to every configured account

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use libcrosscast::config::resolve_config_path;
use libcrosscast::logging::{LogFormat, LoggingConfig, LOG_LEVEL_ENV};
use libcrosscast::platforms::http::HttpConnector;
use libcrosscast::{
    Attachment, Config, ConfigError, CrosscastError, Crossposter, Message, MessageInput, Outcome,
    Result, Visibility,
};
use tracing::debug;

/// Line that separates the messages of a chain read from stdin
const CHAIN_DELIMITER: &str = "---";

#[derive(Parser, Debug)]
#[command(name = "cast-post")]
#[command(version)]
#[command(about = "Post a message or a reply thread to every configured account")]
#[command(long_about = r#"Post a message or a reply thread to Mastodon, Bluesky and Twitter accounts.

One MESSAGE is posted on its own; several are posted as a reply chain, each
one replying to the previous. Without MESSAGE arguments the content is read
from stdin, and lines consisting of '---' split it into a chain.

EXAMPLES:
    # Post one message everywhere
    cast-post "Hello world"

    # Post a thread
    cast-post "First" "Second" "Third"

    # Thread from stdin
    printf 'First\n---\nSecond\n' | cast-post

    # Attach an image with a description
    cast-post "Sunset" --media sunset.jpg --alt "Orange sky over the bay"

    # Machine-readable results
    cast-post "Hello" --format json | jq '.[] | select(.type == "error")'

CONFIGURATION:
    $CROSSCAST_CONFIG or ~/.config/crosscast/config.toml

    [defaults]
    reject_on_any_failure = false

    [[backends]]
    type = "mastodon"
    server = "https://botsin.space"
    token = "$MASTODON_TOKEN"

    [[backends]]
    type = "bluesky"
    username = "me.bsky.social"
    password = "$BLUESKY_APP_PASSWORD"

EXIT CODES:
    0 - Posted (possibly with some accounts failing)
    1 - Posting failed or configuration error
    2 - Authentication failed on every account
    3 - Invalid input
"#)]
struct Cli {
    /// Messages to post (reads from stdin if not provided)
    #[arg(value_name = "MESSAGE")]
    messages: Vec<String>,

    /// Configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Post as a chain even when there is a single message
    #[arg(long)]
    thread: bool,

    /// Attach media to the first message (repeatable)
    #[arg(short, long, value_name = "PATH")]
    media: Vec<PathBuf>,

    /// Description for every attached media file
    #[arg(long, value_name = "TEXT", requires = "media")]
    alt: Option<String>,

    /// Post visibility on Mastodon (public, unlisted, private, direct)
    #[arg(long, value_name = "VISIBILITY")]
    visibility: Option<Visibility>,

    /// Fail when any account fails, not only when all of them do
    #[arg(long)]
    reject_on_any_failure: bool,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json"])]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log format on stderr (text, json, pretty)
    #[arg(long, value_name = "FORMAT", env = "CROSSCAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "warn".to_string());
    LoggingConfig::new(cli.log_format, level, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let texts = if cli.messages.is_empty() {
        split_chain(&read_stdin()?)
    } else {
        cli.messages.clone()
    };
    let input = build_input(texts, &cli)?;

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => resolve_config_path()?,
    };
    let config = Config::load_from_path(&config_path)?;
    if config.backends.is_empty() {
        return Err(ConfigError::MissingField("backends".to_string()).into());
    }
    debug!(
        "Loaded {} backend(s) from {}",
        config.backends.len(),
        config_path.display()
    );

    let mut global = config.defaults;
    global.reject_on_any_failure |= cli.reject_on_any_failure;

    let crossposter = Crossposter::new(HttpConnector::new()?).with_settings(config.adapter);
    match crossposter.crosspost(input, config.backends, &global).await {
        Ok(crossposted) => print_outcomes(crossposted.outcomes(), &cli.format),
        Err(CrosscastError::Aggregate(failure)) => {
            print_outcomes(failure.outcomes(), &cli.format)?;
            Err(failure.into())
        }
        Err(e) => Err(e),
    }
}

fn read_stdin() -> Result<String> {
    let mut content = String::new();
    std::io::stdin()
        .read_to_string(&mut content)
        .map_err(|e| CrosscastError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
    Ok(content)
}

/// Split text into chain messages on `---` lines
fn split_chain(content: &str) -> Vec<String> {
    let mut messages = vec![String::new()];
    for line in content.lines() {
        if line.trim() == CHAIN_DELIMITER {
            messages.push(String::new());
            continue;
        }
        if let Some(current) = messages.last_mut() {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    messages.into_iter().map(|m| m.trim().to_string()).collect()
}

fn build_input(texts: Vec<String>, cli: &Cli) -> Result<MessageInput> {
    if texts.iter().any(|text| text.trim().is_empty()) {
        return Err(CrosscastError::InvalidInput(
            "Content cannot be empty".to_string(),
        ));
    }

    let chain = cli.thread || texts.len() > 1;
    let mut messages: Vec<Message> = texts
        .into_iter()
        .map(|text| {
            let message = Message::new(text);
            match cli.visibility {
                Some(visibility) => message.with_visibility(visibility),
                None => message,
            }
        })
        .collect();

    if let Some(first) = messages.first_mut() {
        for path in &cli.media {
            let attachment = Attachment::from_path(path);
            first.media.push(match &cli.alt {
                Some(alt) => attachment.with_caption(alt.clone()),
                None => attachment,
            });
        }
    }

    if chain {
        Ok(MessageInput::Chain(messages))
    } else {
        let message = messages
            .pop()
            .ok_or_else(|| CrosscastError::InvalidInput("Content cannot be empty".to_string()))?;
        Ok(MessageInput::Single(message))
    }
}

fn print_outcomes(outcomes: &[Outcome], format: &str) -> Result<()> {
    if format == "json" {
        let json = serde_json::to_string_pretty(outcomes)
            .map_err(|e| CrosscastError::InvalidInput(format!("Failed to serialize outcomes: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    let blocks: Vec<String> = outcomes.iter().map(render_text).collect();
    println!("{}", blocks.join("\n\n"));
    Ok(())
}

fn render_text(outcome: &Outcome) -> String {
    let status = if outcome.is_error() { "failed" } else { "ok" };
    format!("[{}] {}\n{}", outcome.platform(), status, outcome.message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libcrosscast::PlatformKind;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("cast-post").chain(args.iter().copied()))
    }

    #[test]
    fn test_split_chain_on_delimiter_lines() {
        let parts = split_chain("First line\nstill first\n---\nSecond\n  ---  \nThird\n");
        assert_eq!(parts, vec!["First line\nstill first", "Second", "Third"]);
    }

    #[test]
    fn test_split_chain_without_delimiter() {
        assert_eq!(split_chain("just one\n"), vec!["just one"]);
        assert_eq!(split_chain(""), vec![""]);
    }

    #[test]
    fn test_single_message_input() {
        let cli = cli(&["hello"]);
        let input = build_input(cli.messages.clone(), &cli).unwrap();
        assert_eq!(input, MessageInput::Single(Message::new("hello")));
    }

    #[test]
    fn test_thread_flag_forces_chain() {
        let cli = cli(&["--thread", "hello"]);
        let input = build_input(cli.messages.clone(), &cli).unwrap();
        assert_eq!(input, MessageInput::Chain(vec![Message::new("hello")]));
    }

    #[test]
    fn test_media_attaches_to_first_message() {
        let cli = cli(&[
            "a", "b", "--media", "one.png", "--media", "two.jpg", "--alt", "desc", "--visibility",
            "unlisted",
        ]);
        let MessageInput::Chain(messages) = build_input(cli.messages.clone(), &cli).unwrap() else {
            panic!("expected a chain");
        };

        assert_eq!(messages[0].media.len(), 2);
        assert_eq!(messages[0].media[1].path(), Some(std::path::Path::new("two.jpg")));
        assert_eq!(messages[0].media[0].caption.as_deref(), Some("desc"));
        assert!(messages[1].media.is_empty());
        assert!(messages
            .iter()
            .all(|m| m.visibility == Some(Visibility::Unlisted)));
    }

    #[test]
    fn test_empty_message_is_invalid_input() {
        let cli = cli(&["first", "   "]);
        let err = build_input(cli.messages.clone(), &cli).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_render_text_blocks() {
        let failed = Outcome::Error {
            platform: PlatformKind::Twitter,
            message: "twitter error:\n\nPosting failed: HTTP 403".to_string(),
        };
        assert_eq!(
            render_text(&failed),
            "[twitter] failed\ntwitter error:\n\nPosting failed: HTTP 403"
        );
    }
}
