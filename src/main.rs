use clap::{Parser, Subcommand};
use frontdesk::Result;
use frontdesk::commands::{
    ask, chat, gaps, kb_add, kb_deactivate, kb_list, rebuild, seed, show_config, show_status,
};
use frontdesk::config::default_data_dir;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "frontdesk")]
#[command(about = "Retrieval-augmented customer service answer engine for small businesses")]
#[command(version)]
struct Cli {
    /// Data directory holding the configuration, database, and index
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,
    /// Load demo knowledge base entries and build the index
    Seed,
    /// Manage knowledge base entries
    Kb {
        #[command(subcommand)]
        action: KbCommands,
    },
    /// Rebuild the vector index from the knowledge base
    Rebuild,
    /// Show index and knowledge base status
    Status,
    /// List questions the bot could not answer, or resolve one
    Gaps {
        /// Mark this question id as resolved
        #[arg(long)]
        resolve: Option<i64>,
    },
    /// Ask a single question through the answer pipeline
    Ask {
        /// The question to answer
        question: String,
        /// User id used for conversation history
        #[arg(long, default_value = "cli-user")]
        user: String,
    },
    /// Interactive chat session
    Chat {
        /// User id used for conversation history
        #[arg(long, default_value = "cli-user")]
        user: String,
    },
}

#[derive(Subcommand)]
enum KbCommands {
    /// Add a knowledge base entry
    Add {
        /// Entry category (e.g. "Services", "Hours")
        category: String,
        /// Entry title
        title: String,
        /// Entry body text
        content: String,
    },
    /// List all knowledge base entries
    List,
    /// Deactivate an entry so it is excluded from the next index build
    Deactivate {
        /// Entry id to deactivate
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir().map_err(|e| frontdesk::FrontdeskError::Config(e.to_string()))?,
    };

    match cli.command {
        Commands::Config => {
            show_config(&data_dir)?;
        }
        Commands::Seed => {
            seed(&data_dir).await?;
        }
        Commands::Kb { action } => match action {
            KbCommands::Add {
                category,
                title,
                content,
            } => {
                kb_add(&data_dir, category, title, content).await?;
            }
            KbCommands::List => {
                kb_list(&data_dir).await?;
            }
            KbCommands::Deactivate { id } => {
                kb_deactivate(&data_dir, id).await?;
            }
        },
        Commands::Rebuild => {
            rebuild(&data_dir).await?;
        }
        Commands::Status => {
            show_status(&data_dir).await?;
        }
        Commands::Gaps { resolve } => {
            gaps(&data_dir, resolve).await?;
        }
        Commands::Ask { question, user } => {
            ask(&data_dir, &question, &user).await?;
        }
        Commands::Chat { user } => {
            chat(&data_dir, &user).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["frontdesk", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            matches!(parsed.command, Commands::Status);
        }
    }

    #[test]
    fn ask_command_with_question() {
        let cli = Cli::try_parse_from(["frontdesk", "ask", "What time do you open?"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { question, user } = parsed.command {
                assert_eq!(question, "What time do you open?");
                assert_eq!(user, "cli-user");
            }
        }
    }

    #[test]
    fn ask_command_with_user_override() {
        let cli = Cli::try_parse_from([
            "frontdesk",
            "ask",
            "Do you do balayage?",
            "--user",
            "telegram-42",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { user, .. } = parsed.command {
                assert_eq!(user, "telegram-42");
            }
        }
    }

    #[test]
    fn kb_add_command() {
        let cli = Cli::try_parse_from([
            "frontdesk", "kb", "add", "Hours", "Opening Hours", "Open 9-18.",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Kb {
                action: KbCommands::Add { category, .. },
            } = parsed.command
            {
                assert_eq!(category, "Hours");
            }
        }
    }

    #[test]
    fn global_data_dir_flag() {
        let cli = Cli::try_parse_from(["frontdesk", "--data-dir", "/tmp/fd", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.data_dir, Some(PathBuf::from("/tmp/fd")));
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["frontdesk", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["frontdesk", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
