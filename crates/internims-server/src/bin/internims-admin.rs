//! Administrative CLI for the authorized host store.
//!
//! ```text
//! internims-admin add-host <pre_site_id> <pubkey.pem> [common name]
//! internims-admin set-active <site_id> <true|false>
//! internims-admin list-hosts
//! ```
//!
//! Reads the same configuration as the server (`INTERNIMS_CONFIG_PATH` or
//! `config.toml`) to find the database.

use chrono::Utc;
use internims_auth::{list_hosts, register_authorized_host, set_active};
use internims_server::config;
use std::process::ExitCode;

const USAGE: &str = "usage:
  internims-admin add-host <pre_site_id> <pubkey.pem> [common name]
  internims-admin set-active <site_id> <true|false>
  internims-admin list-hosts";

fn run(args: &[String]) -> Result<(), String> {
    let config_path = std::env::var("INTERNIMS_CONFIG_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "config.toml".to_string());
    let config = config::load_config(Some(&config_path)).map_err(|e| e.to_string())?;

    let pool = internims_db::open_registry(
        &config.database.path,
        internims_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: 1,
        },
    )
    .map_err(|e| format!("failed to open {}: {e}", config.database.path))?;
    let conn = pool.get().map_err(|e| e.to_string())?;

    match args {
        [cmd, pre_site_id, key_path, rest @ ..] if cmd == "add-host" => {
            let pem = std::fs::read_to_string(key_path)
                .map_err(|e| format!("failed to read {key_path}: {e}"))?;
            let common_name = rest.join(" ");
            let host = register_authorized_host(&conn, pre_site_id, &pem, &common_name, Utc::now())
                .map_err(|e| e.to_string())?;
            println!("registered {}", host.site_id);
        }
        [cmd, site_id, flag] if cmd == "set-active" => {
            let active: bool = flag
                .parse()
                .map_err(|_| format!("expected true or false, got {flag:?}"))?;
            set_active(&conn, site_id, active).map_err(|e| e.to_string())?;
            println!("{site_id} active={active}");
        }
        [cmd] if cmd == "list-hosts" => {
            for host in list_hosts(&conn).map_err(|e| e.to_string())? {
                println!(
                    "{}\t{}\t{}\t{}",
                    host.site_id,
                    if host.active { "active" } else { "inactive" },
                    host.created_at,
                    host.common_name
                );
            }
        }
        _ => return Err(USAGE.to_string()),
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
