mod config;
mod error;

use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use catalog::{SearchQuery, ToolDescriptor};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use runtime::{ExecutionRequest, ExecutionResult, Runtime};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

#[derive(Parser)]
#[command(name = "mcpx")]
#[command(about = "Run code snippets against on-demand tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./mcpx.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Load session state from this JSON file and write it back on exit
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a snippet file ("-" reads stdin)
    Run {
        file: PathBuf,
        /// Session to run in
        #[arg(short, long)]
        session: Option<String>,
        /// Print the full execution result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read snippets interactively; a blank line runs the buffered block
    Repl {
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Execute several snippet files concurrently, one session per file
    Batch {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List catalog servers
    Servers,
    /// Search tools by name or description
    Search {
        query: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short = 'S', long)]
        server: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List the tools of one server
    Tools { server: String },
    /// List sessions held in the state file
    Sessions,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::discover(cli.config.as_deref())?;
    let catalog = catalog::maritime::catalog().map_err(runtime::Error::from)?;
    let rt = Arc::new(Runtime::new(Arc::new(catalog), config.policy, config.runtime));

    if let Some(path) = &cli.state {
        let restored = rt.sessions().load_snapshot(path)?;
        tracing::debug!(path = %path.display(), restored, "restored sessions");
    }

    let outcome = match cli.command {
        Some(Commands::Run {
            file,
            session,
            json,
        }) => cmd_run(&rt, &file, session, json),
        Some(Commands::Repl { session }) => cmd_repl(&rt, session),
        None => cmd_repl(&rt, None),
        Some(Commands::Batch { files, json }) => cmd_batch(&rt, files, json).await,
        Some(Commands::Servers) => {
            for server in rt.catalog().list_servers() {
                println!("{server}");
            }
            Ok(())
        }
        Some(Commands::Search {
            query,
            category,
            server,
            limit,
        }) => {
            let mut search = SearchQuery::new(query.unwrap_or_default());
            if let Some(category) = category {
                search = search.category(category);
            }
            if let Some(server) = server {
                search = search.server(server);
            }
            if let Some(limit) = limit {
                search = search.limit(limit);
            }
            print_tools(&rt.catalog().search(&search));
            Ok(())
        }
        Some(Commands::Tools { server }) => {
            print_tools(&rt.catalog().list_tools(&server));
            Ok(())
        }
        Some(Commands::Sessions) => cmd_sessions(&rt),
    };

    // State is written back even when an execution failed.
    if let Some(path) = &cli.state {
        rt.sessions().save_snapshot(path)?;
    }
    outcome
}

fn cmd_run(rt: &Runtime, file: &Path, session: Option<String>, json: bool) -> Result<()> {
    let code = read_snippet(file)?;
    let out = rt.execute_code(&code, session.as_deref());
    report(&out, json)?;
    if out.success {
        Ok(())
    } else {
        Err(Error::ExecutionsFailed {
            failed: 1,
            total: 1,
        })
    }
}

fn cmd_repl(rt: &Runtime, session: Option<String>) -> Result<()> {
    println!("mcpx v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Session: {}",
        session.as_deref().unwrap_or(&rt.config().default_session)
    );
    println!("End a block with a blank line. Type 'quit' or Ctrl+D to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut buffer = String::new();

    loop {
        print!("{}", if buffer.is_empty() { ">>> " } else { "... " });
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let trimmed = line.trim_end();
        if buffer.is_empty() {
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == "quit" || trimmed == "exit" {
                break;
            }
        }

        if !trimmed.is_empty() {
            buffer.push_str(trimmed);
            buffer.push('\n');
            // Single simple statements run immediately.
            if !buffer.contains(":\n") && buffer.lines().count() == 1 {
                submit(rt, &mut buffer, session.as_deref())?;
            }
            continue;
        }
        submit(rt, &mut buffer, session.as_deref())?;
    }

    if !buffer.is_empty() {
        submit(rt, &mut buffer, session.as_deref())?;
    }
    println!(
        "\nTokens saved this run: {}",
        rt.get_total_tokens_saved()
    );
    Ok(())
}

fn submit(rt: &Runtime, buffer: &mut String, session: Option<&str>) -> Result<()> {
    let out = rt.execute_code(buffer, session);
    buffer.clear();
    report(&out, false)?;
    println!();
    Ok(())
}

async fn cmd_batch(rt: &Arc<Runtime>, files: Vec<PathBuf>, json: bool) -> Result<()> {
    let mut handles = Vec::with_capacity(files.len());
    for file in &files {
        let code = read_snippet(file)?;
        let session = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());
        let request = ExecutionRequest::new(code).with_session(session);
        handles.push(tokio::spawn(Arc::clone(rt).execute_async(request)));
    }

    let total = handles.len();
    let mut failed = 0;
    for (file, handle) in files.iter().zip(handles) {
        let out = handle
            .await
            .map_err(|e| runtime::Error::Crashed(e.to_string()))?;
        if !json {
            println!("== {} ==", file.display());
        }
        report(&out, json)?;
        if !out.success {
            failed += 1;
        }
    }

    if !json {
        println!(
            "{total} executions, {} tokens saved",
            rt.get_total_tokens_saved()
        );
    }
    if failed > 0 {
        return Err(Error::ExecutionsFailed { failed, total });
    }
    Ok(())
}

fn cmd_sessions(rt: &Runtime) -> Result<()> {
    let sessions = rt.sessions().list_sessions();
    if sessions.is_empty() {
        println!("No sessions found. Pass --state <file> to load saved sessions.");
        return Ok(());
    }

    println!(
        "{:<20}  {:<16}  {:<6}  {:<6}  TOKENS SAVED",
        "SESSION", "LAST ACTIVE", "KEYS", "RUNS"
    );
    println!("{}", "-".repeat(70));
    for summary in sessions {
        let active = Local
            .from_utc_datetime(&summary.last_active_at.naive_utc())
            .format("%Y-%m-%d %H:%M");
        println!(
            "{:<20}  {:<16}  {:<6}  {:<6}  {}",
            summary.id.as_str(),
            active.to_string(),
            summary.keys,
            summary.executions,
            summary.cumulative_tokens_saved
        );
    }
    Ok(())
}

fn read_snippet(path: &Path) -> Result<String> {
    let read = if path.as_os_str() == "-" {
        let mut code = String::new();
        io::stdin().read_to_string(&mut code).map(|_| code)
    } else {
        std::fs::read_to_string(path)
    };
    read.map_err(|source| Error::Snippet {
        path: path.to_path_buf(),
        source,
    })
}

fn report(out: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(out)?);
        return Ok(());
    }

    print!("{}", out.stdout);
    if out.success {
        if !out.result.is_null() {
            println!("{}", serde_json::to_string_pretty(&out.result)?);
        }
    } else if let Some(error) = &out.error {
        eprintln!("{error}");
    }

    let tools: Vec<String> = out.tools_used.iter().map(ToString::to_string).collect();
    eprintln!(
        "[{:.3}s, {} tokens saved{}]",
        out.execution_time_seconds,
        out.tokens_saved,
        if tools.is_empty() {
            String::new()
        } else {
            format!(", tools: {}", tools.join(", "))
        }
    );
    Ok(())
}

fn print_tools(tools: &[ToolDescriptor]) {
    if tools.is_empty() {
        println!("No tools found.");
        return;
    }
    for tool in tools {
        println!("{}/{}", tool.server, tool.name);
        println!("    {}", tool.description);
        if !tool.parameters.is_empty() {
            let params: Vec<String> = tool
                .parameters
                .iter()
                .map(|p| {
                    if p.required {
                        p.name.clone()
                    } else {
                        format!("{}?", p.name)
                    }
                })
                .collect();
            println!("    params: {}", params.join(", "));
        }
    }
}
