// db/test_support.rs
// Shared test helpers and macros for database tests.

use super::pool::DatabasePool;
use std::sync::Arc;

/// Run a sync database operation in the test pool, unwrapping the result.
///
/// ```ignore
/// let bead = db!(pool, |conn| beads::create(conn, "/repo", "bd-1", &new).map_err(Into::into));
/// ```
#[allow(unused_macros)]
macro_rules! db {
    ($pool:expr, |$conn:ident| $body:expr) => {
        $pool.interact(move |$conn| $body).await.unwrap()
    };
}
#[allow(unused_imports)]
pub(crate) use db;

/// Create a test pool (in-memory DB, migrations applied).
pub async fn setup_test_pool() -> Arc<DatabasePool> {
    Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool"),
    )
}

/// Create a sync in-memory connection with all migrations applied. Use this
/// for sync tests that don't need async pool semantics.
pub fn setup_test_connection() -> rusqlite::Connection {
    use super::pool::ensure_sqlite_vec_registered;
    use super::schema::run_all_migrations;
    ensure_sqlite_vec_registered();
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    run_all_migrations(&conn).unwrap();
    conn
}

/// Seed a bead with sensible defaults. Returns the bead id passed in.
pub fn seed_bead<'a>(conn: &rusqlite::Connection, project_key: &str, id: &'a str, title: &str) -> &'a str {
    super::beads::create(
        conn,
        project_key,
        id,
        &super::beads::NewBead {
            title: title.to_string(),
            issue_type: super::beads::IssueType::Task,
            priority: 2,
            ..Default::default()
        },
    )
    .unwrap();
    id
}

/// Seed an agent registration.
pub fn seed_agent(conn: &rusqlite::Connection, project_key: &str, name: &str) {
    super::agents::register(conn, project_key, name, Some("claude"), Some("sonnet")).unwrap();
}
