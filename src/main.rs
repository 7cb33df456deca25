#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use sessionkeeper::agent::{create_runner, EchoAgent, RoundTrip, Runner};
use sessionkeeper::config::Config;
use sessionkeeper::sessions::{
    create_session_store, SessionIdentity, SessionState, SessionStore, StateValue,
};

/// `sessionkeeper` - session state and interaction history for interactive agents.
#[derive(Parser, Debug)]
#[command(name = "sessionkeeper")]
#[command(version)]
#[command(about = "Session state and interaction history for interactive agents.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with the built-in agent, showing session state around each query
    #[command(long_about = "\
Chat with the built-in agent.

Creates a fresh in-memory session, then runs each query as a round trip: \
the session is rendered, the query is recorded, the agent answers, the \
answer is recorded, and the session is rendered again. Use --message for a \
single query without entering interactive mode.

Examples:
  sessionkeeper chat                                  # interactive session
  sessionkeeper chat -m \"hi\" --user-name Alice        # single message
  SESSIONKEEPER_UPDATE_MODE=legacy sessionkeeper chat")]
    Chat {
        /// Single message mode (don't enter interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// User ID for the session identity
        #[arg(long, default_value = "user")]
        user: String,

        /// Session ID (defaults to a random UUID)
        #[arg(long)]
        session: Option<String>,

        /// Initial `user_name` stored in session state
        #[arg(long)]
        user_name: Option<String>,
    },

    /// Run a scripted round trip and print the final session state
    Demo,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completion script to stdout
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
    /// Print the effective configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(config_dir) = &cli.config_dir {
        if config_dir.trim().is_empty() {
            bail!("--config-dir cannot be empty");
        }
        std::env::set_var("SESSIONKEEPER_CONFIG_DIR", config_dir);
    }

    // Completions must remain stdout-only and should not load config or initialize logging.
    if let Commands::Completions { shell } = &cli.command {
        let mut stdout = std::io::stdout().lock();
        write_shell_completion(*shell, &mut stdout)?;
        return Ok(());
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load_or_init().await?;

    match cli.command {
        Commands::Completions { .. } => unreachable!(),

        Commands::Chat {
            message,
            user,
            session,
            user_name,
        } => {
            let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let identity = SessionIdentity::new(&config.sessions.app_name, user, session_id);

            let mut initial = SessionState::new();
            if let Some(name) = user_name {
                initial.insert("user_name".into(), StateValue::from(name));
            }

            let store = create_session_store();
            store.create(&identity, initial).await?;
            println!("Created session {identity}");
            let runner = build_runner(&config, &store)?;

            match message {
                Some(message) => {
                    print_round_trip(&runner.run_round_trip(&identity, &message).await);
                }
                None => chat_loop(&runner, &identity).await?,
            }
            Ok(())
        }

        Commands::Demo => run_demo(&config).await,

        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => {
                let schema = schemars::schema_for!(Config);
                println!("{}", serde_json::to_string_pretty(&schema)?);
                Ok(())
            }
            ConfigCommands::Show => {
                println!("# {}", config.config_path.display());
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        },
    }
}

fn build_runner(config: &Config, store: &Arc<dyn SessionStore>) -> Result<Runner> {
    let agent = Arc::new(EchoAgent::new(&config.agent.name, store.clone()));
    create_runner(config, store.clone(), agent)
}

async fn chat_loop(runner: &Runner, identity: &SessionIdentity) -> Result<()> {
    println!("Type a message, or 'exit' to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query.to_ascii_lowercase().as_str(), "exit" | "quit") {
            println!("Ending conversation. Goodbye!");
            break;
        }
        print_round_trip(&runner.run_round_trip(identity, query).await);
    }
    Ok(())
}

async fn run_demo(config: &Config) -> Result<()> {
    let store = create_session_store();
    let identity = SessionIdentity::new(
        &config.sessions.app_name,
        "brandon_hancock",
        uuid::Uuid::new_v4().to_string(),
    );

    let mut initial = SessionState::new();
    initial.insert("user_name".into(), StateValue::from("Brandon Hancock"));
    initial.insert(
        "user_preferences".into(),
        StateValue::from("I like to play Pickleball, Disc Golf, and Tennis. My favorite food is Mexican."),
    );
    store.create(&identity, initial).await?;
    println!("Created new session {identity}");

    let runner = build_runner(config, &store)?;
    print_round_trip(
        &runner
            .run_round_trip(&identity, "What is Brandon's favorite TV show?")
            .await,
    );

    println!("=== Final Session State ===");
    let session = store.get(&identity).await?;
    for (key, value) in &session.state {
        println!("{key}: {value}");
    }
    Ok(())
}

fn print_round_trip(trip: &RoundTrip) {
    if let Some(before) = &trip.before {
        println!("\n{before}");
    }
    match &trip.final_response {
        Some(text) => println!("\n== AGENT RESPONSE ==\n{text}\n"),
        None => println!("\n==> Agent finished without a text response.\n"),
    }
    if let Some(after) = &trip.after {
        println!("{after}");
    }
}

fn write_shell_completion<W: Write>(shell: Shell, writer: &mut W) -> Result<()> {
    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, bin_name, writer);
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_has_no_flag_conflicts() {
        Cli::command().debug_assert();
    }

    #[test]
    fn chat_cli_parses_single_message() {
        let cli = Cli::try_parse_from(["sessionkeeper", "chat", "-m", "hi", "--user-name", "Alice"])
            .expect("chat invocation should parse");
        match cli.command {
            Commands::Chat {
                message,
                user,
                user_name,
                ..
            } => {
                assert_eq!(message.as_deref(), Some("hi"));
                assert_eq!(user, "user");
                assert_eq!(user_name.as_deref(), Some("Alice"));
            }
            other => panic!("expected chat command, got {other:?}"),
        }
    }

    #[test]
    fn completions_cli_parses_supported_shells() {
        for shell in ["bash", "fish", "zsh", "powershell", "elvish"] {
            let cli = Cli::try_parse_from(["sessionkeeper", "completions", shell])
                .expect("completions invocation should parse");
            match cli.command {
                Commands::Completions { .. } => {}
                other => panic!("expected completions command, got {other:?}"),
            }
        }
    }

    #[test]
    fn completion_generation_mentions_binary_name() {
        let mut output = Vec::new();
        write_shell_completion(Shell::Bash, &mut output)
            .expect("completion generation should succeed");
        let script = String::from_utf8(output).expect("completion output should be valid utf-8");
        assert!(
            script.contains("sessionkeeper"),
            "completion script should reference binary name"
        );
    }
}
