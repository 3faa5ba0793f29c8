// vault-tasks/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use vault_tasks::{
    ConfigLayer, ConfigManager, FsVault, Liveness, RefreshScheduler, SchedulerOptions, Scope, Task, TaskEngine,
    TaskSettings, TaskStore, VaultWatch,
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PatchScope { User, Workspace }

#[derive(Parser)]
#[command(name = "vault-tasks", version, about = "Checkbox tasks across a Markdown vault")]
struct Args {
    /// Vault directory (defaults to `vault.root` from config, then the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the tasks of the configured scope
    List {
        #[arg(long)]
        json: bool,
        /// Include completed tasks and ignore `tasks.max_display`
        #[arg(long)]
        all: bool,
    },
    /// Append a new open task to the target document
    Add { #[arg(required = true, trailing_var_arg = true)] text: Vec<String> },
    /// Check or uncheck a task by id (`path:line`)
    Toggle { id: String },
    /// Remove a task line by id
    Delete { id: String },
    /// Remove completed tasks older than the retention window
    Cleanup {
        /// Override `tasks.cleanup_delay_days`
        #[arg(long)]
        days: Option<u32>,
    },
    /// Keep running: re-parse on changes and evict on schedule
    Watch,
    /// Persist one config key, e.g. `set tasks.cleanup_delay_days 3`
    Set {
        key: String,
        value: String,
        #[arg(long, value_enum, default_value_t = PatchScope::Workspace)]
        scope: PatchScope,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cwd = std::env::current_dir().context("current directory")?;
    let workspace = args.root.clone().unwrap_or_else(|| cwd.clone());
    let cfg_manager = ConfigManager::load(&workspace)?;
    let cfg = cfg_manager.get();
    let root = args.root.clone().or_else(|| cfg.vault.root.clone()).unwrap_or(cwd);

    let fs_vault = FsVault::new(&root, cfg.vault.extensions.clone());
    let engine = Arc::new(TaskEngine::new(Arc::new(fs_vault.clone()), cfg.tasks.clone()));

    match args.cmd {
        Cmd::List { json, all } => {
            let report = engine.refresh().await?;
            for (doc, err) in &report.unreadable {
                eprintln!("warning: {}: {}", doc, err);
            }
            let store = engine.snapshot();
            let shown = listed(&store, all, &cfg.tasks);
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                print_tasks(&store, &shown, &cfg.tasks);
            }
        }
        Cmd::Add { text } => match engine.add(&text.join(" ")).await? {
            Some(doc) => println!("task added to {}", doc),
            None => println!("nothing to add"),
        },
        Cmd::Toggle { id } => {
            let task = find(&engine, &id).await?;
            let toggled = engine.toggle(&task).await?;
            println!("{} {}", if toggled.new_completed { "completed" } else { "reopened" }, task.text);
            if engine.wants_immediate_cleanup(&toggled) {
                let before = engine.snapshot().len();
                let opts = SchedulerOptions { cleanup_interval: None, ..SchedulerOptions::from_config(&cfg) };
                let scheduler = RefreshScheduler::start(engine.clone(), opts);
                if let Some(pending) = scheduler.cleanup_soon() { pending.await?; }
                let removed = before.saturating_sub(engine.snapshot().len());
                if removed > 0 { println!("cleaned up {} completed task(s)", removed); }
            }
        }
        Cmd::Delete { id } => {
            let task = find(&engine, &id).await?;
            engine.delete(&task).await?;
            println!("deleted {}", task.text);
        }
        Cmd::Cleanup { days } => {
            engine.refresh().await?;
            let retention = vault_tasks::eviction::retention_ms(days.unwrap_or(cfg.tasks.cleanup_delay_days));
            let report = engine.evict(retention, &Liveness::new()).await;
            println!("cleaned up {} completed task(s) in {} document(s)", report.removed, report.documents.len());
            for (doc, err) in &report.failed {
                eprintln!("warning: {}: {}", doc, err);
            }
        }
        Cmd::Watch => watch(engine, fs_vault, SchedulerOptions::from_config(&cfg), &cfg.tasks).await?,
        Cmd::Set { key, value, scope } => {
            let patch = ConfigLayer::from_assignment(&key, &value)?;
            let scope = match scope { PatchScope::User => Scope::User, PatchScope::Workspace => Scope::Workspace };
            let path = cfg_manager.write_patch(scope, &patch)?;
            println!("{} = {} ({})", key, value, path.display());
        }
    }
    Ok(())
}

async fn find(engine: &TaskEngine, id: &str) -> Result<Task> {
    engine.refresh().await?;
    match engine.snapshot().get(id) {
        Some(t) => Ok(t.clone()),
        None => bail!("no task with id {}", id),
    }
}

fn listed<'a>(store: &'a TaskStore, all: bool, settings: &TaskSettings) -> Vec<&'a Task> {
    if all { store.tasks().iter().collect() } else { store.visible(settings.max_display) }
}

fn print_tasks(store: &TaskStore, shown: &[&Task], settings: &TaskSettings) {
    for t in shown {
        let mut line = format!("- [{}] {}", if t.completed { "x" } else { " " }, t.text);
        if let Some(c) = &t.category { line.push_str(&format!("  #{}", c)); }
        let marker = t.priority.marker();
        if !marker.is_empty() { line.push_str(&format!("  {}", marker)); }
        println!("{}  ({})", line, t.id);
    }
    if settings.shows_progress() {
        let p = store.progress();
        println!("{}/{} ({}%)", p.completed, p.total, p.percent);
    }
}

async fn watch(engine: Arc<TaskEngine>, vault: FsVault, opts: SchedulerOptions, settings: &TaskSettings) -> Result<()> {
    let mut updates = engine.subscribe();
    engine.refresh().await?;
    let store = engine.snapshot();
    print_tasks(&store, &store.visible(settings.max_display), settings);

    let scheduler = RefreshScheduler::start(engine.clone(), opts);
    let _watch = VaultWatch::start(&vault, scheduler.notifier())?;
    info!(root = %vault.root().display(), "watching for changes, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snap = updates.recv() => match snap {
                Ok(store) => print_tasks(&store, &store.visible(settings.max_display), settings),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }
    scheduler.shutdown();
    Ok(())
}
