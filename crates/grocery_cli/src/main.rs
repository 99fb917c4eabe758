//! Command-line entry point.
//!
//! # Responsibility
//! - Wire settings, logging, the local store, the remote mirror and the
//!   robot link together for one invocation.
//! - Keep process bootstrap thin; list semantics live in `grocery_core`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grocery_core::{
    init_logging, open_db, open_db_in_memory, CommandSink, ConnectionManager, DetectionMatcher,
    Endpoint, ListItem, ReconciliationEngine, RestRemoteStore, Settings, SqliteItemStore,
};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "grocery", version, about = "Robot-assisted grocery list")]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long, env = "GROCERY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the list, newest first
    List,
    /// Add an item or replace an existing one
    Add {
        name: String,
        #[arg(default_value_t = 1)]
        quantity: u32,
    },
    /// Flip the fulfilled flag of an item
    Toggle { name: String },
    /// Change the quantity of an item
    Qty { name: String, quantity: u32 },
    /// Remove an item
    Delete { name: String },
    /// Remove every fulfilled item
    ClearFulfilled,
    /// Remove every item
    ClearAll,
    /// Connect to the robot and check off detected items until Ctrl-C
    Watch {
        /// Robot address as `host[:port]`; defaults to the configured one
        endpoint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    init_logging(&settings.logging).context("initializing logging")?;

    let conn = match &settings.storage.db_path {
        Some(path) => open_db(path),
        None => open_db_in_memory(),
    }
    .context("opening list database")?;
    let remote = RestRemoteStore::new(&settings.remote).context("configuring remote store")?;
    let link = ConnectionManager::websocket(&settings.robot);
    let engine = ReconciliationEngine::open(SqliteItemStore::new(conn), Arc::new(remote))?
        .with_command_sink(Arc::new(link.clone()) as Arc<dyn CommandSink>);
    let engine = Arc::new(engine);
    engine.seed_from_remote().await?;

    match args.command {
        Cmd::List => print_items(&engine.items()),
        Cmd::Add { name, quantity } => match engine.add(&name, quantity).await? {
            Some(item) => print_items(&[item]),
            None => println!("nothing added: name is blank"),
        },
        Cmd::Toggle { name } => print_items(&[engine.toggle_fulfilled(&name).await?]),
        Cmd::Qty { name, quantity } => {
            print_items(&[engine.set_quantity(&name, quantity).await?])
        }
        Cmd::Delete { name } => {
            if !engine.delete(&name).await? {
                println!("no local item named {name}");
            }
        }
        Cmd::ClearFulfilled => println!("removed {}", engine.clear_fulfilled().await?),
        Cmd::ClearAll => println!("removed {}", engine.clear_all().await?),
        Cmd::Watch { endpoint } => {
            let endpoint = match endpoint {
                Some(raw) => Endpoint::parse(&raw)?,
                None => settings.robot.endpoint(),
            };
            link.connect(endpoint.clone()).await;
            info!("event=cli_watch module=cli status=start endpoint={endpoint} state={}", link.state());

            let matcher = DetectionMatcher::new(settings.detection.unmatched);
            let task = tokio::spawn(matcher.run(engine.clone(), link.subscribe_telemetry()));
            let mut states = link.subscribe_state();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        println!("connection {}", *states.borrow_and_update());
                    }
                }
            }
            task.abort();
            link.disconnect().await;
            print_items(&engine.items());
        }
    }

    engine.flush_remote().await;
    Ok(())
}

fn print_items(items: &[ListItem]) {
    if items.is_empty() {
        println!("(empty)");
    }
    for item in items {
        let mark = if item.fulfilled { "x" } else { " " };
        println!("[{mark}] {} x{}", item.name, item.quantity);
    }
}
