//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `tether_core` linkage.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `tether_cli [DB_PATH]`. Without a path an in-memory database is
//! opened. `TETHER_LOG_DIR` (absolute) enables file logging at
//! `TETHER_LOG_LEVEL`.

use std::process::ExitCode;
use tether_core::db::migrations::current_user_version;
use tether_core::db::{open_db, open_db_in_memory};
use tether_core::{CoreConfig, Relation, SqliteEntityStore};

fn main() -> ExitCode {
    println!("tether_core ping={}", tether_core::ping());
    println!("tether_core version={}", tether_core::core_version());

    let config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("tether_core config error: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "tether_core host_name={} consistency={}",
        config.host_name,
        config.consistency.as_str()
    );

    if let Ok(log_dir) = std::env::var("TETHER_LOG_DIR") {
        let level = std::env::var("TETHER_LOG_LEVEL")
            .unwrap_or_else(|_| tether_core::default_log_level().to_string());
        if let Err(err) = tether_core::init_logging(&level, &log_dir) {
            eprintln!("tether_core logging error: {err}");
            return ExitCode::FAILURE;
        }
        println!("tether_core log_dir={log_dir} level={level}");
    }

    let opened = match std::env::args().nth(1) {
        Some(path) => open_db(path),
        None => open_db_in_memory(),
    };
    let conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("tether_core db error: {err}");
            return ExitCode::FAILURE;
        }
    };
    match current_user_version(&conn) {
        Ok(version) => println!("tether_core schema_version={version}"),
        Err(err) => {
            eprintln!("tether_core db error: {err}");
            return ExitCode::FAILURE;
        }
    }
    if let Err(err) = SqliteEntityStore::try_new(&conn) {
        eprintln!("tether_core store error: {err}");
        return ExitCode::FAILURE;
    }

    for relation in Relation::ALL {
        println!(
            "relation {relation}: {} -> {} {:?}",
            relation.owner_kind(),
            relation.item_kind(),
            relation.cardinality()
        );
    }
    ExitCode::SUCCESS
}
