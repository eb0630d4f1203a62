use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docwhisper",
    about = "Ask questions about your PDFs and notes, answered from their contents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract, chunk and index documents (files or directories)
    Add(AddArgs),
    /// Show the chunks most similar to a query
    Search(SearchArgs),
    /// Answer a question from the indexed documents
    Ask(AskArgs),
    /// List indexed source documents
    List(ListArgs),
    /// Show system status and statistics
    Status(StatusArgs),
    /// Re-extract and re-embed every registered source
    Rebuild,
    /// Remove every indexed document
    Clear,
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Add --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Files or directories to index
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Chunk size in characters (defaults to the chunk_size setting)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Overlap between chunks in characters (defaults to chunk_overlap)
    #[arg(long)]
    pub overlap: Option<usize>,

    /// Only index directory entries whose relative path matches this glob
    #[arg(long)]
    pub glob: Option<String>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of chunks to return (defaults to the top_k setting)
    #[arg(short)]
    pub k: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub query: String,

    /// Number of chunks used as context (defaults to the top_k setting)
    #[arg(short)]
    pub k: Option<usize>,

    /// Let the model answer from general knowledge instead of the documents
    #[arg(long)]
    pub ignore_documents: bool,

    /// Print the retrieved chunks before the answer
    #[arg(long)]
    pub show_context: bool,

    /// Output the answer and its context as JSON
    #[arg(long)]
    pub json: bool,
}

// -- List --

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective value of every setting
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
    /// Clear a stored setting (revert to default)
    Unset {
        /// Setting name
        key: String,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docwhisper",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_ask_defaults() {
        let cli = Cli::parse_from(["docwhisper", "ask", "how long to bake?"]);
        match cli.command {
            Command::Ask(args) => {
                assert_eq!(args.query, "how long to bake?");
                assert_eq!(args.k, None);
                assert!(!args.ignore_documents);
                assert!(!args.show_context);
                assert!(!args.json);
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn parse_add_with_options() {
        let cli = Cli::parse_from([
            "docwhisper",
            "-v",
            "add",
            "docs",
            "paper.pdf",
            "--chunk-size",
            "256",
            "--overlap",
            "32",
            "--glob",
            "*.pdf",
        ]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Add(args) => {
                assert_eq!(
                    args.paths,
                    vec![PathBuf::from("docs"), PathBuf::from("paper.pdf")]
                );
                assert_eq!(args.chunk_size, Some(256));
                assert_eq!(args.overlap, Some(32));
                assert_eq!(args.glob.as_deref(), Some("*.pdf"));
            }
            _ => panic!("expected add command"),
        }
    }

    #[test]
    fn add_requires_a_path() {
        assert!(Cli::try_parse_from(["docwhisper", "add"]).is_err());
    }

    #[test]
    fn parse_search_k() {
        let cli =
            Cli::parse_from(["docwhisper", "search", "bake", "-k", "5", "--json"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.k, Some(5));
                assert!(args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(
            Cli::try_parse_from(["docwhisper", "-q", "-v", "status"]).is_err()
        );
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
