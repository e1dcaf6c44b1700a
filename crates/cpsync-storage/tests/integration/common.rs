//! Disposable PostgreSQL containers for store tests.

use std::time::Duration;

use cpsync_core::{NewProblem, ProblemKey, ProblemKind};
use cpsync_storage::PgProblemStore;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Starts a fresh PostgreSQL container and returns a migrated store.
///
/// Keep the container alive for the whole test; dropping it stops the database.
pub async fn setup_store() -> (PgProblemStore, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16-alpine")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "cpsync")
        .with_env_var("POSTGRES_PASSWORD", "cpsync")
        .with_env_var("POSTGRES_DB", "cpsync")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");
    let url = format!("postgres://cpsync:cpsync@{host}:{port}/cpsync");

    // The entrypoint restarts the server once after initdb.
    const MAX_RETRIES: u32 = 50;
    let mut retries = 0;
    let store = loop {
        match PgProblemStore::connect(&url, 4).await {
            Ok(store) => break store,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    };

    store.migrate().await.expect("Failed to run migrations");
    (store, container)
}

pub fn sample_problem(contest_id: i32, index: &str) -> NewProblem {
    NewProblem {
        key: ProblemKey::new(contest_id, index),
        name: format!("Problem {contest_id}{index}"),
        kind: ProblemKind::Programming,
        statement: format!("Statement of {contest_id}{index}."),
        solved_count: Some(42),
    }
}

pub fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
