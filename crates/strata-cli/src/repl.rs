//! REPL – Read-Eval-Print Loop for the Strata memory shell.
//!
//! Plain input is recorded as a `user` turn.  Supported slash-commands:
//!   /assistant <text> – record an assistant turn
//!   /system <text>    – record a system turn
//!   /context [query]  – render the prompt context for `query`
//!   /expand <id>      – show a chunk with its turns restored
//!   /stats            – chunk and tier counters
//!   /flush            – run queued summarisation/embedding work now
//!   /prune            – delete archive files past the retention window
//!   /models           – list the models served at the configured URL
//!   /help             – show this list
//!   /quit | /exit     – gracefully exit the shell

use colored::Colorize;
use std::io::{self, Write};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use strata_memory::Store;
use strata_types::{Chunk, ChunkPayload, Role, Turn};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

/// One parsed line of input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Say(Role, String),
    Context(String),
    Expand(String),
    Stats,
    Flush,
    Prune,
    Models,
    Help,
    Quit,
    /// A known command with missing arguments; carries the usage line.
    Usage(&'static str),
    Unknown(String),
}

/// Parse one line.  Returns `None` for blank input.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Say(Role::User, line.to_string()));
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let cmd = match name {
        "/assistant" | "/system" if rest.is_empty() => Command::Usage("/assistant <text>  |  /system <text>"),
        "/assistant" => Command::Say(Role::Assistant, rest.to_string()),
        "/system" => Command::Say(Role::System, rest.to_string()),
        "/context" => Command::Context(rest.to_string()),
        "/expand" if rest.is_empty() => Command::Usage("/expand <chunk-id>"),
        "/expand" => Command::Expand(rest.to_string()),
        "/stats" => Command::Stats,
        "/flush" => Command::Flush,
        "/prune" => Command::Prune,
        "/models" => Command::Models,
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    };
    Some(cmd)
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when cancelled the REPL exits
/// cleanly.  Async store calls are driven on `runtime`.
pub fn run(runtime: &Runtime, store: &Store, cfg: &Config, shutdown: &CancellationToken) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let prompt = format!("{} ", "strata>".bold().cyan());

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        let Some(cmd) = parse_command(&line) else {
            continue;
        };
        let _ = editor.add_history_entry(line.trim());

        match cmd {
            Command::Say(role, text) => cmd_say(store, role, text),
            Command::Context(query) => cmd_context(runtime, store, cfg, &query),
            Command::Expand(id) => cmd_expand(store, &id),
            Command::Stats => cmd_stats(store),
            Command::Flush => {
                let done = runtime.block_on(store.run_pending());
                println!("{} {} deferred task(s) completed", "✓".green(), done);
            }
            Command::Prune => match store.prune_archives() {
                Ok(n) => println!("{} {} archive file(s) removed", "✓".green(), n),
                Err(e) => println!("{}: {}", "Prune failed".red(), e),
            },
            Command::Models => cmd_models(runtime, cfg),
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.cancel();
                break;
            }
            Command::Usage(usage) => println!("{} {}", "Usage:".yellow(), usage),
            Command::Unknown(other) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Strata Commands".bold().underline());
    println!("  {}             – record a user turn", "<text>".bold().cyan());
    println!("  {}  – record an assistant turn", "/assistant <text>".bold().cyan());
    println!("  {}     – record a system turn", "/system <text>".bold().cyan());
    println!("  {}   – render prompt context", "/context [query]".bold().cyan());
    println!("  {}       – show a chunk with its turns", "/expand <id>".bold().cyan());
    println!("  {}             – chunk and tier counters", "/stats".bold().cyan());
    println!("  {}             – run deferred summaries now", "/flush".bold().cyan());
    println!("  {}             – drop expired archive files", "/prune".bold().cyan());
    println!("  {}            – list served models", "/models".bold().cyan());
    println!("  {}       – exit the shell", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_say(store: &Store, role: Role, text: String) {
    let before = store.stats().total_chunks;
    match store.add_turn(Turn::new(role, text)) {
        Ok(_) => {
            let stats = store.stats();
            if stats.total_chunks > before {
                println!(
                    "  {} turn {} → {} chunk(s), {} hot",
                    "✓".green(),
                    stats.total_turns,
                    stats.total_chunks,
                    stats.hot_chunks
                );
            }
        }
        Err(e) => println!("{}: {}", "Failed to record turn".red(), e),
    }
}

fn cmd_context(runtime: &Runtime, store: &Store, cfg: &Config, query: &str) {
    match runtime.block_on(store.get_context_for_prompt(query, cfg.context_tokens)) {
        Ok(text) if text.is_empty() => println!("{}", "(no memory yet)".dimmed()),
        Ok(text) => {
            println!();
            println!("{text}");
            println!();
        }
        Err(e) => println!("{}: {}", "Context error".red(), e),
    }
}

fn cmd_expand(store: &Store, chunk_id: &str) {
    match store.expand(chunk_id) {
        Ok(chunk) => print_chunk(&chunk),
        Err(e) => println!("{}: {}", "Expand failed".red(), e),
    }
}

fn print_chunk(chunk: &Chunk) {
    println!(
        "{} {} turns {} ({} tokens)",
        chunk.chunk_type.as_str().bold(),
        chunk.id.yellow(),
        chunk.turn_range,
        chunk.token_count
    );
    if !chunk.summary.is_empty() {
        println!("  {}", chunk.summary.dimmed());
    }
    if !chunk.themes.is_empty() {
        let themes: Vec<&str> = chunk.themes.iter().map(String::as_str).collect();
        println!("  Themes: {}", themes.join(", "));
    }
    if let ChunkPayload::Turns(turns) = &chunk.payload {
        for turn in turns {
            println!("  {}: {}", turn.role.as_str().cyan(), turn.content);
        }
    }
}

fn cmd_stats(store: &Store) {
    match serde_json::to_string_pretty(&store.stats()) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Stats error".red(), e),
    }
}

fn cmd_models(runtime: &Runtime, cfg: &Config) {
    println!("{}", "AI Models".bold().underline());
    println!("  Summary model   : {}", cfg.model.yellow());
    println!("  Embedding model : {}", cfg.embedding_model.yellow());
    print!("  Probing {} … ", cfg.llm_url.dimmed());
    io::stdout().flush().ok();

    match runtime.block_on(strata_runtime::fetch_models(&cfg.llm_url)) {
        Ok(models) if models.is_empty() => {
            println!("{}", "no models found".yellow());
            println!("  Run `ollama pull {}` to download a model.", cfg.model);
        }
        Ok(models) => {
            println!("{}", "online".green());
            for m in &models {
                let active = m.name == cfg.model || m.name == cfg.embedding_model;
                let marker = if active { "▶" } else { " " };
                println!("    {} {}", marker.green(), m.name.bold());
            }
        }
        Err(e) => {
            println!("{}", "offline".red());
            println!("  {}", e.to_string().dimmed());
            println!("  Is Ollama running?  Try: ollama serve");
        }
    }
}
