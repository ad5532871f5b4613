//! kbchat CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use kbchat::{
    api::{BackendClient, MlStreamClient, StreamSource},
    commands::{
        cmd_ask, cmd_cache_clear, cmd_cache_stats, cmd_delete_chat, cmd_delete_document,
        cmd_document_status, cmd_init, cmd_list_chats, cmd_list_documents, cmd_mention,
        cmd_new_chat, cmd_rename_chat, cmd_show_chat, cmd_tags, cmd_upload_documents, open_cache,
        print_ask_result, print_cache_stats, print_chats, print_document_status, print_documents,
        print_mention, print_tags, print_transcript, print_upload_reports, AskOptions,
        InitOptions, MentionOptions,
    },
    config::Config,
    error::{Error, Result},
    progress::LogWriterFactory,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kbchat")]
#[command(version, about = "Chat with your document knowledge base", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize kbchat configuration and local cache
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,

        /// Write defaults without prompting
        #[arg(long)]
        non_interactive: bool,
    },

    /// Manage documents in the knowledge base
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Manage chats
    Chats {
        #[command(subcommand)]
        action: ChatsAction,
    },

    /// Ask a question and stream the answer
    Ask {
        /// The question; `@-name.pdf` tags scope it to documents
        question: String,

        /// Continue an existing chat
        #[arg(long)]
        chat: Option<String>,

        /// Restrict the answer to a document (id or name, repeatable)
        #[arg(short, long = "doc")]
        docs: Vec<String>,

        /// Reload the document list instead of using the cache
        #[arg(long)]
        refresh: bool,

        /// Print the cited passages after the answer
        #[arg(long)]
        show_sources: bool,
    },

    /// Suggest documents for an `@` mention at the cursor
    Mention {
        /// Text being composed
        text: String,

        /// Cursor position in characters (defaults to the end)
        #[arg(long)]
        cursor: Option<usize>,

        /// Move the selection down this many times
        #[arg(long, default_value = "0")]
        down: usize,

        /// Insert the selected document into the text
        #[arg(long)]
        commit: bool,
    },

    /// Show the verified document tags in a text
    Tags {
        text: String,
    },

    /// Inspect or clear the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    /// List documents
    List {
        /// Reload from the backend instead of the cache
        #[arg(long)]
        refresh: bool,
    },

    /// Upload files and wait for processing
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Delete a document
    Delete {
        document_id: String,
    },

    /// Show a document's processing status
    Status {
        document_id: String,
    },
}

#[derive(Subcommand)]
enum ChatsAction {
    /// List chats
    List,

    /// Create an empty chat
    New {
        title: String,
    },

    /// Print a chat's messages
    Show {
        chat_id: String,
    },

    /// Rename a chat
    Rename {
        chat_id: String,
        title: String,
    },

    /// Delete a chat
    Delete {
        chat_id: String,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache usage
    Stats,

    /// Remove every cached entry
    Clear,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if let Commands::Init {
        force,
        non_interactive,
    } = cli.command
    {
        let (base_dir, config_path) = init_paths(cli.config.as_deref());
        return cmd_init(InitOptions {
            base_dir,
            config_path,
            force,
            non_interactive,
        })
        .await;
    }

    // Handle completions command (doesn't need config)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "kbchat", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Docs { action } => handle_docs(&config, action, json).await?,

        Commands::Chats { action } => handle_chats(&config, action, json).await?,

        Commands::Ask {
            question,
            chat,
            docs,
            refresh,
            show_sources,
        } => {
            let client = Arc::new(BackendClient::from_config(&config)?);
            let source: Arc<dyn StreamSource> = Arc::new(MlStreamClient::from_config(&config)?);
            let cache = open_cache(&config).await;

            let result = cmd_ask(
                &config,
                client,
                source,
                cache,
                AskOptions {
                    question,
                    chat_id: chat,
                    documents: docs,
                    refresh_documents: refresh,
                    show_progress: !json,
                },
            )
            .await?;

            if json {
                print_json(&result)?;
            } else {
                print_ask_result(&result, show_sources);
            }
        }

        Commands::Mention {
            text,
            cursor,
            down,
            commit,
        } => {
            let client = BackendClient::from_config(&config)?;
            let cache = open_cache(&config).await;
            let result = cmd_mention(
                &config,
                &client,
                cache,
                MentionOptions {
                    text,
                    cursor,
                    down,
                    commit,
                },
            )
            .await?;

            if json {
                print_json(&result)?;
            } else {
                print_mention(&result);
            }
        }

        Commands::Tags { text } => {
            let client = BackendClient::from_config(&config)?;
            let cache = open_cache(&config).await;
            let result = cmd_tags(&config, &client, cache.as_deref(), &text).await?;

            if json {
                print_json(&result)?;
            } else {
                print_tags(&result);
            }
        }

        Commands::Cache { action } => match action {
            CacheAction::Stats => {
                let stats = cmd_cache_stats(&config).await?;
                if json {
                    print_json(&stats)?;
                } else {
                    print_cache_stats(&config, &stats);
                }
            }
            CacheAction::Clear => {
                let removed = cmd_cache_clear(&config).await?;
                if json {
                    println!(r#"{{"status": "ok", "removed": {}}}"#, removed);
                } else {
                    println!("✓ Removed {} cache entries", removed);
                }
            }
        },
    }

    Ok(())
}

async fn handle_docs(config: &Config, action: DocsAction, json: bool) -> Result<()> {
    let client = Arc::new(BackendClient::from_config(config)?);
    let cache = open_cache(config).await;

    match action {
        DocsAction::List { refresh } => {
            let documents =
                cmd_list_documents(config, &client, cache.as_deref(), refresh).await?;
            if json {
                print_json(&documents)?;
            } else {
                print_documents(&documents);
            }
        }

        DocsAction::Upload { paths } => {
            let reports =
                cmd_upload_documents(config, client, cache.as_deref(), paths, !json).await?;
            if json {
                print_json(&reports)?;
            } else {
                print_upload_reports(&reports);
            }
            if reports.iter().any(|r| r.status != "completed") {
                std::process::exit(1);
            }
        }

        DocsAction::Delete { document_id } => {
            cmd_delete_document(&client, cache.as_deref(), &document_id).await?;
            if json {
                println!(r#"{{"status": "ok", "deleted": "{}"}}"#, document_id);
            } else {
                println!("✓ Deleted document {}", document_id);
            }
        }

        DocsAction::Status { document_id } => {
            let report = cmd_document_status(&client, &document_id).await?;
            if json {
                print_json(&report)?;
            } else {
                print_document_status(&document_id, &report);
            }
        }
    }

    Ok(())
}

async fn handle_chats(config: &Config, action: ChatsAction, json: bool) -> Result<()> {
    let client = BackendClient::from_config(config)?;

    match action {
        ChatsAction::List => {
            let chats = cmd_list_chats(&client).await?;
            if json {
                print_json(&chats)?;
            } else {
                print_chats(&chats);
            }
        }

        ChatsAction::New { title } => {
            let chat = cmd_new_chat(config, &client, &title).await?;
            if json {
                print_json(&chat)?;
            } else {
                println!("✓ Created chat '{}': {}", chat.title, chat.id);
            }
        }

        ChatsAction::Show { chat_id } => {
            let transcript = cmd_show_chat(config, &client, &chat_id).await?;
            if json {
                print_json(&transcript)?;
            } else {
                print_transcript(&transcript);
            }
        }

        ChatsAction::Rename { chat_id, title } => {
            let chat = cmd_rename_chat(config, &client, &chat_id, &title).await?;
            if json {
                print_json(&chat)?;
            } else {
                println!("✓ Renamed chat {}: {}", chat.id, chat.title);
            }
        }

        ChatsAction::Delete { chat_id } => {
            cmd_delete_chat(&client, &chat_id).await?;
            if json {
                println!(r#"{{"status": "ok", "deleted": "{}"}}"#, chat_id);
            } else {
                println!("✓ Deleted chat {}", chat_id);
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Base directory and config file for `init`; `--config` may name either
fn init_paths(path: Option<&Path>) -> (PathBuf, PathBuf) {
    match path {
        Some(path) if path.extension().is_some_and(|ext| ext == "toml") => {
            let base = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (base, path.to_path_buf())
        }
        Some(path) => (path.to_path_buf(), path.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            (base.clone(), base.join("config.toml"))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}
