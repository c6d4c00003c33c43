//! `watch`: follow a live connection until Ctrl-C or `--duration`.
//!
//! The monitor registers as an application with the lifecycle, starts the
//! connection manager, and prints every change of the three observable
//! cells (connection state, latest status, allowed plans).

use std::sync::Arc;
use std::time::Duration;

use qserver_api::{HttpRunEngine, PlansMap, RateLimiter, RunEngineService};
use qserver_config::Settings;
use qserver_core::{AppContext, ConnectionState, StatusSnapshot};
use serde_json::json;
use tracing::{debug, info};

use crate::cli::WatchArgs;
use crate::error::CliError;

/// Build the HTTP service shared by every command.
pub fn build_service(settings: &Settings) -> Result<Arc<HttpRunEngine>, CliError> {
    let limiter = Arc::new(RateLimiter::new(settings.rate_limit_per_sec)?);
    let service = HttpRunEngine::new(settings.url.clone(), &settings.transport, limiter)?;
    Ok(Arc::new(service))
}

pub async fn watch(settings: &Settings, args: &WatchArgs) -> Result<(), CliError> {
    let service: Arc<dyn RunEngineService> = build_service(settings)?;
    let ctx = AppContext::new(settings.connection.clone(), service)?;
    let printer = Printer { json: args.json };

    let mut state_rx = ctx.connection().state().subscribe();
    let mut status_rx = ctx.status_bus().latest().subscribe();
    let mut plans_rx = ctx.plans().plans().subscribe();

    ctx.lifecycle().register_app();
    ctx.connection().start();
    info!(url = %settings.url, "watching queue server");

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                debug!("interrupted");
                break;
            }
            () = &mut deadline => break,
            Ok(()) = state_rx.changed() => {
                let state = *state_rx.borrow_and_update();
                printer.state(state)?;
            }
            Ok(()) = status_rx.changed() => {
                let status = status_rx.borrow_and_update().clone();
                printer.status(status.as_deref())?;
            }
            Ok(()) = plans_rx.changed() => {
                let plans = Arc::clone(&plans_rx.borrow_and_update());
                printer.plans(&plans)?;
            }
        }
    }

    ctx.lifecycle().unregister_app();
    ctx.event_loop().flush().await;
    Ok(())
}

// ── Output ───────────────────────────────────────────────────────────

struct Printer {
    json: bool,
}

impl Printer {
    fn state(&self, state: ConnectionState) -> Result<(), CliError> {
        if self.json {
            emit(&json!({ "event": "state", "state": state.to_string() }))
        } else {
            println!("connection: {state}");
            Ok(())
        }
    }

    fn status(&self, status: Option<&StatusSnapshot>) -> Result<(), CliError> {
        if self.json {
            return emit(&json!({ "event": "status", "status": status }));
        }
        match status {
            Some(s) => {
                let queued = s
                    .items_in_queue()
                    .map_or_else(|| "?".to_owned(), |n| n.to_string());
                println!(
                    "status: manager_state={} items_in_queue={queued} worker_environment_exists={}",
                    s.manager_state,
                    s.worker_environment_exists()
                );
            }
            None => println!("status: (none)"),
        }
        Ok(())
    }

    fn plans(&self, plans: &PlansMap) -> Result<(), CliError> {
        if self.json {
            let names: Vec<&String> = plans.keys().collect();
            return emit(&json!({ "event": "plans", "plans": names }));
        }
        println!("allowed plans: {}", plans.len());
        Ok(())
    }
}

fn emit(value: &serde_json::Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
