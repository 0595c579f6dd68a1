//! Dev-only tasks invoked as `cargo run -p xtask -- <command>`.
//!
//! - `check-fixtures`: loads every bundled sample machine definition through
//!   the real loader and reports which ones fail, without needing a running
//!   server.
//! - `soak`: registers a batch of machines on an [`Orchestrator`] and fires a
//!   burst of events at each under `DropOldest` backpressure, to eyeball
//!   throughput and confirm the fallback path in `Orchestrator::enqueue`
//!   doesn't wedge under load.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _, Result};
use statecraft_core::model::{ActionTable, GuardTable};
use statecraft_core::{loader, Backpressure, Machine, Orchestrator};

fn main() -> Result<()> {
    let command = std::env::args().nth(1).unwrap_or_default();
    match command.as_str() {
        "check-fixtures" => check_fixtures(),
        "soak" => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("building tokio runtime")?;
            rt.block_on(soak())
        }
        other => bail!("unknown xtask command '{other}' (expected check-fixtures | soak)"),
    }
}

fn fixtures() -> Vec<(&'static str, serde_json::Value)> {
    vec![
        (
            "traffic_light",
            serde_json::json!({
                "id": "trafficLight",
                "initial": "red",
                "states": {
                    "red": { "on": { "TIMER": "yellow" } },
                    "yellow": { "on": { "TIMER": "green" } },
                    "green": { "on": { "TIMER": "red" } }
                }
            }),
        ),
        (
            "toggle",
            serde_json::json!({
                "id": "toggle",
                "initial": "off",
                "states": {
                    "off": { "on": { "FLIP": "on" } },
                    "on": { "on": { "FLIP": "off" } }
                }
            }),
        ),
        (
            "parallel_regions",
            serde_json::json!({
                "id": "device",
                "initial": "on",
                "states": {
                    "on": {
                        "type": "parallel",
                        "states": {
                            "wifi": {
                                "initial": "disconnected",
                                "states": {
                                    "disconnected": { "on": { "CONNECT": "connected" } },
                                    "connected": { "on": { "DISCONNECT": "disconnected" } }
                                }
                            },
                            "bluetooth": {
                                "initial": "off",
                                "states": {
                                    "off": { "on": { "TOGGLE": "ready" } },
                                    "ready": { "on": { "TOGGLE": "off" } }
                                }
                            }
                        }
                    }
                }
            }),
        ),
    ]
}

fn check_fixtures() -> Result<()> {
    let mut failures = 0;
    for (name, doc) in fixtures() {
        match loader::load(&doc) {
            Ok(graph) => println!("ok    {name} ({} states)", graph.all_ids().count()),
            Err(err) => {
                println!("FAIL  {name}: {err}");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} fixture(s) failed to load");
    }
    Ok(())
}

async fn soak() -> Result<()> {
    const MACHINES: usize = 50;
    const EVENTS_PER_MACHINE: usize = 200;

    let orchestrator = Orchestrator::new(Duration::from_secs(1), 32);
    let (_, doc) = fixtures()
        .into_iter()
        .find(|(name, _)| *name == "traffic_light")
        .expect("traffic_light fixture present");
    let graph = Arc::new(loader::load(&doc)?);

    for i in 0..MACHINES {
        let machine = Machine::build(format!("soak-{i}"), Arc::clone(&graph), ActionTable::new(), GuardTable::new())?;
        orchestrator.register(machine, Backpressure::DropOldest, None).await;
    }

    let start = Instant::now();
    for i in 0..MACHINES {
        let id = format!("soak-{i}");
        for _ in 0..EVENTS_PER_MACHINE {
            let _ = orchestrator.send_fire_and_forget(&id, "TIMER", serde_json::Value::Null).await;
        }
    }
    let elapsed = start.elapsed();

    let total = MACHINES * EVENTS_PER_MACHINE;
    println!(
        "soak: {total} events across {MACHINES} machines in {elapsed:?} ({:.0} events/s)",
        total as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
