//! Placestore RPC Server, JSON-RPC over stdin/stdout.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmarks.insert", "params":{"parentGuid":"unfiled_____","url":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Change notifications are written as {"event":"notifications","batch":[...]}.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use placestore::app::Places;
use placestore::rpc_handler::handle_method;
use placestore::services::observers::CallbackObserver;
use placestore::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use placestore::types::errors::NotificationError;
use placestore::types::notification::Notification;

use serde_json::{json, Value};

fn emit(line: &Value) {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{}", line);
    let _ = out.flush();
}

fn main() {
    let mut settings = SettingsEngine::from_env();
    let config = match settings.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("placestore: {}", e);
            std::process::exit(2);
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_filter.as_str())).init();

    let places = match Places::open(config) {
        Ok(places) => places,
        Err(e) => {
            log::error!("failed to open store: {}", e);
            std::process::exit(1);
        }
    };
    places.register_observer(Arc::new(CallbackObserver::new(
        "rpc-stdout",
        |batch: &[Notification]| -> Result<(), NotificationError> {
            emit(&json!({"event": "notifications", "batch": batch}));
            Ok(())
        },
    )));

    emit(&json!({"event":"ready","version":env!("CARGO_PKG_VERSION")}));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                emit(&json!({"id":null,"error":format!("parse error: {}",e)}));
                continue;
            }
        };

        let id = req.get("id").cloned().unwrap_or(Value::Null);
        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let params = req.get("params").cloned().unwrap_or(json!({}));

        log::debug!("rpc {} {}", id, method);
        let response = match handle_method(&places, method, &params) {
            Ok(val) => json!({"id": id, "result": val}),
            Err(err) => json!({"id": id, "error": err}),
        };
        emit(&response);
    }

    places.close();
    log::info!("stdin closed, store shut down");
}
