//! `strata-cli` – interactive shell over a Strata conversation store.
//!
//! The binary:
//!
//! 1. Loads `~/.strata/config.toml`, running a short **First-Run Wizard**
//!    when the file is absent.
//! 2. Wires the model-server summarizer and embedder when `use_providers`
//!    is set, and probes the server for available models.
//! 3. Opens the store and starts the background enrichment worker.
//! 4. Drops the user into an **interactive REPL** (see [`repl`]).
//! 5. Intercepts **Ctrl-C** to stop the worker and exit cleanly.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use strata_memory::{Collaborator, Embedder, EmbedderSlot, Store, Summarizer, SummarizerSlot};
use strata_runtime::{LlmSummarizer, OllamaEmbedder};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn main() {
    // Hold the guard for the whole process so pending spans are flushed.
    let _telemetry = strata_runtime::init_tracing("strata");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Collaborators ─────────────────────────────────────────────────────
    let (summarizer, embedder): (SummarizerSlot, EmbedderSlot) = if cfg.use_providers {
        print!("\n  Probing {} … ", cfg.llm_url.dimmed());
        std::io::Write::flush(&mut std::io::stdout()).ok();
        match runtime.block_on(strata_runtime::fetch_models(&cfg.llm_url)) {
            Ok(models) => println!("{} ({} model(s) available)", "online".green(), models.len()),
            Err(_) => {
                println!("{}", "offline".yellow());
                println!(
                    "  {}  Heuristic summaries will be used until `{}` is reachable.",
                    "No model server detected.".dimmed(),
                    cfg.llm_url.bold()
                );
            }
        }
        let summarizer: Arc<dyn Summarizer> =
            Arc::new(LlmSummarizer::new(&cfg.llm_url, &cfg.model).with_api_key(cfg.api_key.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&cfg.llm_url, &cfg.embedding_model));
        (Collaborator::Configured(summarizer), Collaborator::Configured(embedder))
    } else {
        println!(
            "\n  {}",
            "Providers disabled: heuristic summaries, recency retrieval.".dimmed()
        );
        (Collaborator::Absent, Collaborator::Absent)
    };

    // ── Store ─────────────────────────────────────────────────────────────
    let store = match Store::open(&cfg.store_dir, cfg.chunking.clone(), summarizer, embedder) {
        Ok(store) => store,
        Err(e) => {
            eprintln!(
                "{} {}: {}",
                "Failed to open store at".red(),
                cfg.store_dir.display(),
                e
            );
            std::process::exit(1);
        }
    };
    let stats = store.stats();
    println!(
        "  Store {} – {} turn(s), {} chunk(s)",
        cfg.store_dir.display().to_string().bold(),
        stats.total_turns,
        stats.total_chunks
    );
    info!(path = %cfg.store_dir.display(), chunks = stats.total_chunks, "Store opened");

    // ── Shutdown + background worker ──────────────────────────────────────
    let shutdown = CancellationToken::new();
    let worker = {
        let _guard = runtime.enter();
        store.spawn_worker(shutdown.clone())
    };

    let ctrlc_token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        ctrlc_token.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&runtime, &store, &cfg, &shutdown);

    shutdown.cancel();
    if let Err(e) = runtime.block_on(worker) {
        warn!(error = %e, "Enrichment worker ended abnormally");
    }
    println!("{}", "  ✓ Exiting Strata.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Strata First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Strata.\n");

    let mut cfg = config::Config::default();

    println!("  How should chunks be summarised?");
    println!("    1) Heuristics only  (default, fully offline)");
    println!("    2) Local model server (Ollama / OpenAI-compatible)");
    if prompt_line("  Enter choice [1]: ", "1").trim() == "2" {
        cfg.use_providers = true;
        cfg.llm_url = prompt_line(&format!("  Server URL [{}]: ", cfg.llm_url), &cfg.llm_url);
        cfg.model = prompt_line(&format!("  Summary model [{}]: ", cfg.model), &cfg.model);
        cfg.embedding_model = prompt_line(
            &format!("  Embedding model [{}]: ", cfg.embedding_model),
            &cfg.embedding_model,
        );
    }

    let tokens = prompt_line(
        &format!("  Context token budget [{}]: ", cfg.context_tokens),
        &cfg.context_tokens.to_string(),
    );
    if let Ok(t) = tokens.trim().parse::<usize>() {
        cfg.context_tokens = t;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _____ __             __       "#.bold().cyan());
    println!("{}", r#"  / ___// /__________ _/ /_____ _"#.bold().cyan());
    println!("{}", r#"  \__ \/ __/ ___/ __ `/ __/ __ `/"#.bold().cyan());
    println!("{}", r#" ___/ / /_/ /  / /_/ / /_/ /_/ / "#.bold().cyan());
    println!("{}", r#"/____/\__/_/   \__,_/\__/\__,_/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Strata".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Hierarchical conversation memory");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
