use crate::config::{CliOverrides, Config, load_config};
use crate::conversation::LocalConversationFactory;
use crate::gateway;
use crate::service::ChatService;
use crate::session::parse_session_id;
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "dash-sessions")]
#[command(about = "dash-sessions - conversational session service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable verbose logging (DEBUG level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a JSON configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Maximum number of live sessions
    #[arg(long, global = true, value_name = "N")]
    pub max_sessions: Option<usize>,

    /// Idle seconds before a session expires
    #[arg(long, global = true, value_name = "SECS")]
    pub ttl_secs: Option<u64>,

    /// Seconds a caller waits for one turn
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Directory holding conversation transcripts
    #[arg(long, global = true, value_name = "DIR")]
    pub storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display version information
    Version,

    /// Chat with a session, one-shot or interactively
    Chat {
        /// Question to ask; omit for an interactive session
        question: Vec<String>,

        /// Resume an existing session by id
        #[arg(long, value_name = "UUID")]
        session: Option<String>,

        /// Do not write the transcript to disk
        #[arg(long)]
        no_persist: bool,
    },

    /// Serve newline-delimited JSON requests on stdin/stdout
    Gateway,
}

impl Cli {
    fn overrides(&self, no_persist: bool) -> CliOverrides {
        CliOverrides {
            max_sessions: self.max_sessions,
            ttl_secs: self.ttl_secs,
            request_timeout_secs: self.timeout_secs,
            storage_dir: self.storage_dir.clone(),
            no_persist,
        }
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
        Some(Commands::Version) => {
            print_version();
            Ok(())
        }
        Some(Commands::Chat {
            ref question,
            ref session,
            no_persist,
        }) => {
            if let Some(raw) = session {
                if parse_session_id(raw).is_err() {
                    eprintln!("Invalid session ID: {}", raw);
                    process::exit(1);
                }
            }

            let config = load_config(&cli.overrides(no_persist), cli.config.clone())?;
            let question = question.join(" ");
            block_on(run_chat(&config, session.as_deref(), &question))
        }
        Some(Commands::Gateway) => {
            let config = load_config(&cli.overrides(false), cli.config.clone())?;
            block_on(gateway::run_gateway(&config))
        }
    }
}

fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(future);
    // A stdin read may still be parked on a blocking thread
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run_chat(config: &Config, session: Option<&str>, question: &str) -> Result<()> {
    let factory = Arc::new(LocalConversationFactory::new(config.persist));
    let service = ChatService::from_config(config, factory);

    let result = chat_session(&service, session, question).await;
    service.shutdown().await;
    result
}

async fn chat_session(service: &ChatService, session: Option<&str>, question: &str) -> Result<()> {
    let info = service
        .open_session(session)
        .await
        .context("Failed to open session")?;

    if !question.trim().is_empty() {
        let reply = service.chat(Some(&info.id), question).await?;
        println!("{}", reply.reply);
        return Ok(());
    }

    println!("Session: {}", info.id);
    println!("Type 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            println!();
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_quit_command(line) {
            break;
        }

        match service.chat(Some(&info.id), line).await {
            Ok(reply) => println!("{}", reply.reply),
            Err(e) if e.is_recoverable() => eprintln!("Error: {}", e),
            Err(e) => return Err(e.into()),
        }
    }

    println!(
        "Resume this session with: dash-sessions chat --session {}",
        info.id
    );
    Ok(())
}

fn is_quit_command(line: &str) -> bool {
    matches!(line.to_ascii_lowercase().as_str(), "quit" | "exit" | "q")
}

pub fn extract_command_from_error(error_msg: &str) -> String {
    // Try to extract the command name from error messages like:
    // "error: unrecognized subcommand 'invalid_command'"
    if let Some(start) = error_msg.find('\'') {
        if let Some(end) = error_msg[start + 1..].find('\'') {
            return error_msg[start + 1..start + 1 + end].to_string();
        }
    }
    "unknown".to_string()
}

fn print_version() {
    println!("dash-sessions {}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_format() {
        let version = env!("CARGO_PKG_VERSION");
        let parts: Vec<&str> = version.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.parse::<u32>().is_ok()));
    }

    #[test]
    fn test_extract_command_from_error() {
        let msg = "error: unrecognized subcommand 'foo_bar'";
        assert_eq!(extract_command_from_error(msg), "foo_bar");
        assert_eq!(extract_command_from_error("no quotes here"), "unknown");
    }

    #[test]
    fn test_chat_arguments() {
        let cli = Cli::parse_from([
            "dash-sessions",
            "chat",
            "--no-persist",
            "how",
            "many",
            "races",
        ]);

        match cli.command {
            Some(Commands::Chat {
                question,
                session,
                no_persist,
            }) => {
                assert_eq!(question.join(" "), "how many races");
                assert!(session.is_none());
                assert!(no_persist);
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn test_global_flags_become_overrides() {
        let cli = Cli::parse_from([
            "dash-sessions",
            "gateway",
            "--max-sessions",
            "3",
            "--timeout-secs",
            "9",
            "--storage-dir",
            "/tmp/dash",
        ]);

        let overrides = cli.overrides(true);
        assert_eq!(overrides.max_sessions, Some(3));
        assert_eq!(overrides.request_timeout_secs, Some(9));
        assert_eq!(overrides.storage_dir, Some(PathBuf::from("/tmp/dash")));
        assert!(overrides.ttl_secs.is_none());
        assert!(overrides.no_persist);
    }

    #[test]
    fn test_quit_commands() {
        assert!(is_quit_command("quit"));
        assert!(is_quit_command("EXIT"));
        assert!(is_quit_command("q"));
        assert!(!is_quit_command("question"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
