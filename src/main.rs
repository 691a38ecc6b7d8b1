//! dbaccess - Main entry point.
//!
//! Runs one statement against a SQL database (SQLite, PostgreSQL, MySQL) and
//! prints the outcome: one JSON object per row for queries, with an empty
//! line between result sets, or a single JSON object for `--exec`.

use clap::Parser;
use dbaccess::config::{Config, DatabaseUrl};
use dbaccess::db::{Backend, Conn, DbConn, Scanner};
use dbaccess::error::{DbError, DbResult};
use dbaccess::impl_db_dispatch;
use dbaccess::models::QueryParam;
use futures_util::StreamExt;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries results, logs go to stderr
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!("Starting dbaccess v{}", env!("CARGO_PKG_VERSION"));

    let url = DatabaseUrl::parse(&config.database)?;
    let pool_config = config.pool_config(&url.pool);
    let params: Vec<QueryParam> = config
        .params
        .iter()
        .map(|p| QueryParam::from_literal(p))
        .collect();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let conn = DbConn::connect(&url, &pool_config)
        .await?
        .with_statement_timeout(config.statement_timeout())
        .with_rollback_policy(config.rollback_policy);

    let result = impl_db_dispatch!(&conn, {
        MySql(c) => run(c, &config, &params, &cancel).await,
        Postgres(c) => run(c, &config, &params, &cancel).await,
        SQLite(c) => run(c, &config, &params, &cancel).await,
    });

    conn.close().await;

    if let Err(e) = result {
        error!(error = %e, suggestion = ?e.suggestion(), "Statement failed");
        return Err(e.into());
    }

    info!("Done");
    Ok(())
}

async fn run<DB: Backend>(
    conn: &Conn<DB>,
    config: &Config,
    params: &[QueryParam],
    cancel: &CancellationToken,
) -> DbResult<()> {
    if config.exec {
        let result = if config.transaction {
            conn.exec_in_transaction(cancel, &config.sql, params).await?
        } else {
            conn.exec(cancel, &config.sql, params).await?
        };
        println!("{}", to_json(&result)?);
        return Ok(());
    }

    let cursor = if config.transaction {
        conn.query_in_transaction(cancel, &config.sql, params)
            .await?
    } else {
        conn.query(cancel, &config.sql, params).await?
    };
    print_result_sets(Scanner::new(cursor), cancel).await
}

async fn print_result_sets<DB: Backend>(
    mut scanner: Scanner<'_, DB>,
    cancel: &CancellationToken,
) -> DbResult<()> {
    let mut set_index = 0usize;
    loop {
        if set_index > 0 {
            println!();
        }

        let mut printed = 0u64;
        {
            let mut rows = std::pin::pin!(scanner.scan_to_row_map(cancel.clone()).await?);
            while let Some(row) = rows.next().await {
                // Sorted keys keep the output stable between runs
                let row: BTreeMap<String, String> = row.into_iter().collect();
                println!("{}", to_json(&row)?);
                printed += 1;
            }
        }
        debug!(result_set = set_index, rows = printed, "Result set printed");

        if let Some(err) = scanner.error() {
            return Err(err.clone());
        }
        if cancel.is_cancelled() {
            warn!(result_set = set_index, rows = printed, "Output truncated by cancellation");
            break;
        }
        if !scanner.has_next_result_set().await {
            break;
        }
        set_index += 1;
    }
    scanner.close()
}

fn to_json<T: serde::Serialize>(value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::internal(format!("JSON encoding failed: {}", e)))
}
