//! # Code Assist CLI (`assist`)
//!
//! ## Usage
//!
//! ```bash
//! assist --config ./config/assist.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `assist init` | Create the vector store database |
//! | `assist programs` | List configured programs and versions |
//! | `assist index <program>` | Build the semantic index of a version |
//! | `assist search <program> "<query>"` | Similarity search over an indexed version |
//! | `assist status` | Show index status per program version |
//! | `assist delete-index <program>` | Drop a version's index |
//! | `assist symbols <program>` | Print extracted symbols |
//! | `assist chunks <program> <file>` | Print the chunks of one file |
//! | `assist classify <program> "<prompt>"` | Classify a prompt and show selected files |
//! | `assist ask <program> "<prompt>"` | Ask the assistant |
//! | `assist completions <shell>` | Print shell completions |

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use code_assist::assistant::AssistantRequest;
use code_assist::cancel::CancellationToken;
use code_assist::config::{self, Config};
use code_assist::progress::ProgressMode;
use code_assist::semantic_search::SearchOptions;
use code_assist::services::Services;
use code_assist::{logging, migrate, stats};
use code_assist_core::models::CursorContext;
use code_assist_core::response::OperationKind;
use code_assist_core::source::{ProjectSource, VersionResolver};

/// Code Assist: an AI coding assistant with intent-aware file selection
/// and a per-version semantic code index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/assist.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "assist", version, about = "AI coding assistant with a semantic code index")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/assist.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the vector store database. Idempotent.
    Init,

    /// List configured programs and their versions.
    Programs,

    /// Build the semantic index of a program version.
    ///
    /// An existing index is left untouched unless `--force` is given.
    Index {
        program: String,

        /// Version to index. Defaults to the program's current version.
        #[arg(long)]
        version: Option<String>,

        /// Delete and rebuild an existing index.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Similarity search over an indexed version.
    Search {
        program: String,
        query: String,

        #[arg(long)]
        version: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity score in [0, 1].
        #[arg(long)]
        min_score: Option<f64>,

        /// Only chunks from this file.
        #[arg(long)]
        file: Option<String>,

        /// Only chunks in this language.
        #[arg(long)]
        language: Option<String>,
    },

    /// Show index status per program version.
    Status {
        /// Only this program.
        #[arg(long)]
        program: Option<String>,

        /// Also list every stored collection.
        #[arg(long)]
        all: bool,
    },

    /// Delete the semantic index of a program version.
    DeleteIndex {
        program: String,

        #[arg(long)]
        version: Option<String>,
    },

    /// Print symbols extracted from a version (or one file).
    Symbols {
        program: String,

        #[arg(long)]
        version: Option<String>,

        /// Only this file, relative to the version root.
        #[arg(long)]
        file: Option<String>,
    },

    /// Print the chunks produced for one file.
    Chunks {
        program: String,
        file: String,

        #[arg(long)]
        version: Option<String>,
    },

    /// Classify a prompt and show which files would be selected.
    Classify {
        program: String,
        prompt: String,

        #[arg(long)]
        version: Option<String>,

        /// Files open in the editor (repeatable).
        #[arg(long = "open")]
        open_files: Vec<String>,
    },

    /// Ask the assistant about a program.
    Ask {
        program: String,
        prompt: String,

        #[arg(long)]
        version: Option<String>,

        /// Conversation id; history is kept for the life of the process.
        #[arg(long, default_value = "cli")]
        conversation: String,

        /// Files open in the editor (repeatable).
        #[arg(long = "open")]
        open_files: Vec<String>,

        /// File the cursor is in.
        #[arg(long)]
        cursor_file: Option<String>,

        /// Cursor line (1-based).
        #[arg(long)]
        cursor_line: Option<usize>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

fn progress_mode(arg: Option<&str>) -> Result<ProgressMode> {
    match arg {
        None => Ok(ProgressMode::default_for_tty()),
        Some("off") => Ok(ProgressMode::Off),
        Some("human") => Ok(ProgressMode::Human),
        Some("json") => Ok(ProgressMode::Json),
        Some(other) => bail!("Unknown progress mode: {} (use off, human, or json)", other),
    }
}

fn operation_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Create => "create",
        OperationKind::Update => "update",
        OperationKind::Delete => "delete",
    }
}

async fn resolve_version(services: &Services, program: &str, version: Option<String>) -> Result<String> {
    match version {
        Some(v) => Ok(v),
        None => services.workspace.current_version(program).await,
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "assist", &mut io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging)?;

    if let Commands::Init = cli.command {
        return init(&cfg).await;
    }

    let services = Services::from_config(&cfg).await?;
    let token = CancellationToken::new();
    cancel_on_ctrl_c(&token);

    match cli.command {
        Commands::Init | Commands::Completions { .. } => {}
        Commands::Programs => {
            let mut any = false;
            for p in services.workspace.programs() {
                any = true;
                println!("{}", p.id);
                for (version, root) in &p.versions {
                    let marker = if p.current_version.as_deref() == Some(version.as_str()) {
                        " (current)"
                    } else {
                        ""
                    };
                    println!("  {}{}  {}", version, marker, root.display());
                }
            }
            if !any {
                println!("No programs configured.");
            }
        }
        Commands::Index {
            program,
            version,
            force,
            progress,
        } => {
            let reporter = progress_mode(progress.as_deref())?.reporter();
            let version = resolve_version(&services, &program, version).await?;
            let result = services
                .search
                .index_project(&program, &version, force, &token, reporter.as_ref())
                .await;
            println!("{}", result.message);
            for w in result.warnings.iter().filter(|w| **w != result.message) {
                println!("warning: {}", w);
            }
            if !result.success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Search {
            program,
            query,
            version,
            limit,
            min_score,
            file,
            language,
        } => {
            let version = resolve_version(&services, &program, version).await?;
            let mut filters = BTreeMap::new();
            if let Some(f) = file {
                filters.insert("file_path".to_string(), f);
            }
            if let Some(l) = language {
                filters.insert("language".to_string(), l);
            }
            let options = SearchOptions {
                limit,
                min_score,
                filters,
            };
            let hits = services
                .search
                .search_code(&program, &version, &query, &options, &token)
                .await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for hit in hits {
                let c = &hit.chunk;
                println!(
                    "{}. [{:.3}] {}:{}-{}  {} ({})",
                    hit.rank,
                    hit.score,
                    c.file_path,
                    c.start_line,
                    c.end_line,
                    c.name,
                    c.chunk_type.as_str()
                );
            }
        }
        Commands::Status { program, all } => {
            stats::run_status(&cfg, &services, program.as_deref(), all).await?;
        }
        Commands::DeleteIndex { program, version } => {
            let version = resolve_version(&services, &program, version).await?;
            if services.search.delete_index(&program, &version).await? {
                println!("Deleted index for {} {}.", program, version);
            } else {
                println!("No index for {} {}.", program, version);
            }
        }
        Commands::Symbols {
            program,
            version,
            file,
        } => {
            let version = resolve_version(&services, &program, version).await?;
            let files = match file {
                Some(path) => {
                    let (symbols, _) = services
                        .indexer
                        .index_file(&program, &version, &path, &token)
                        .await?;
                    vec![(path, symbols)]
                }
                None => {
                    let index = services
                        .indexer
                        .generate_project_index(&program, &version, &token)
                        .await?;
                    println!(
                        "{} files, {} symbols, ~{} tokens ({})",
                        index.files.len(),
                        index.total_symbols,
                        index.estimated_tokens,
                        index.language
                    );
                    index.file_symbols.into_iter().collect()
                }
            };
            for (path, symbols) in files {
                println!("{}", path);
                for s in symbols {
                    let parent = s.parent.map(|p| format!(" in {}", p)).unwrap_or_default();
                    println!("  {:>5}  {:<10} {}{}", s.line_number, s.kind.as_str(), s.name, parent);
                }
            }
        }
        Commands::Chunks {
            program,
            file,
            version,
        } => {
            let version = resolve_version(&services, &program, version).await?;
            let chunks = services
                .chunker
                .chunk_file(&program, &version, &file, &token)
                .await?;
            println!("{} chunks", chunks.len());
            for c in chunks {
                println!(
                    "  {:<12} lines {}-{}  {}  {}",
                    c.chunk_type.as_str(),
                    c.start_line,
                    c.end_line,
                    c.name,
                    c.id
                );
            }
        }
        Commands::Classify {
            program,
            prompt,
            version,
            open_files,
        } => {
            let version = resolve_version(&services, &program, version).await?;
            let structure = services
                .workspace
                .analyze_project_structure(&program, &version)
                .await?;
            let intent = services
                .classifier
                .classify_intent(&prompt, &structure, &open_files, None, &token)
                .await;
            let budget = cfg
                .assistant
                .context_mode
                .token_budget()
                .saturating_sub(cfg.assistant.structure_token_cost);
            let files = services
                .classifier
                .select_files_based_on_scope(&intent, &structure, &program, &version, budget, &token)
                .await;
            let out = serde_json::json!({ "intent": intent, "selectedFiles": files });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Ask {
            program,
            prompt,
            version,
            conversation,
            open_files,
            cursor_file,
            cursor_line,
            json,
        } => {
            let request = AssistantRequest {
                program_id: program,
                version_id: version,
                prompt,
                conversation_id: conversation,
                open_files,
                cursor: cursor_file.map(|file_path| CursorContext {
                    file_path,
                    line: cursor_line,
                    selected_text: None,
                }),
            };
            let response = services.assistant.process_prompt(&request, &token).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.display_text);
                for op in &response.file_operations {
                    println!();
                    println!(
                        "[{}] {}{}",
                        operation_label(op.operation),
                        op.file_path,
                        op.description
                            .as_deref()
                            .map(|d| format!(": {}", d))
                            .unwrap_or_default()
                    );
                }
                for w in &response.warnings {
                    println!("warning: {}", w);
                }
                if !response.suggestions.is_empty() {
                    println!();
                    println!("Next:");
                    for s in &response.suggestions {
                        println!("  - {}", s);
                    }
                }
                println!();
                println!("confidence: {}", response.metadata.confidence.as_str());
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn init(cfg: &Config) -> Result<ExitCode> {
    if cfg.vector_store.provider == "sqlite" {
        migrate::run_migrations(cfg).await?;
        println!("Database initialized successfully.");
    } else {
        println!(
            "Vector store '{}' keeps no database; nothing to initialize.",
            cfg.vector_store.provider
        );
    }
    Ok(ExitCode::SUCCESS)
}
