//! Read-only inspection of on-device SQLite stores.
//!
//! Every command runs on a dedicated read-only connection opened fresh for
//! that command (mirroring `storage::journal::Journal`'s pragma discipline,
//! minus the write-mode pragmas that don't apply to a read-only handle), and
//! races a hard watchdog timer that calls `Connection::interrupt()` through
//! an `InterruptHandle` obtained before the query starts. A query that is
//! still running when the watchdog fires is interrupted and the command
//! fails with [`DbInspectorError::Timeout`] regardless of what the
//! interrupted statement eventually returns.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine as _;
use probe_protocol::{DbCommandKind, DbCommandPayload, DbResponsePayload};
use regex::Regex;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PAGE_SIZE: u32 = 500;
const MAX_ROWS: usize = 1000;
const MAX_IDENTIFIER_LEN: usize = 128;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "ATTACH", "DETACH", "PRAGMA",
];

/// One database the inspector is allowed to expose to the hub.
#[derive(Debug, Clone)]
pub struct DatabaseSpec {
    pub id: String,
    pub path: PathBuf,
    pub label: String,
    /// Sensitive databases are listed by [`DbCommandKind::ListDatabases`] but
    /// refuse every other command with [`DbInspectorError::AccessDenied`].
    pub sensitive: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DbInspectorError {
    #[error("unknown database: {0}")]
    DatabaseNotFound(String),
    #[error("unknown table: {0}")]
    TableNotFound(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("query timed out")]
    Timeout,
    #[error("access denied")]
    AccessDenied,
    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<rusqlite::Error> for DbInspectorError {
    fn from(e: rusqlite::Error) -> Self {
        DbInspectorError::InternalError(e.to_string())
    }
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

fn valid_identifier(s: &str) -> bool {
    s.len() <= MAX_IDENTIFIER_LEN && identifier_re().is_match(s)
}

/// Registry of on-device databases exposed through the hub's
/// `dbCommand`/`dbResponse` exchange.
pub struct DbInspector {
    databases: HashMap<String, DatabaseSpec>,
    query_timeout: Duration,
}

impl DbInspector {
    pub fn new(databases: Vec<DatabaseSpec>) -> Self {
        Self::with_timeout(databases, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_timeout(databases: Vec<DatabaseSpec>, query_timeout: Duration) -> Self {
        DbInspector {
            databases: databases.into_iter().map(|d| (d.id.clone(), d)).collect(),
            query_timeout,
        }
    }

    /// Dispatch a single command and always produce a response payload; the
    /// hub expects a `dbResponse` for every `dbCommand` it sends, success or
    /// failure.
    pub async fn handle(&self, cmd: DbCommandPayload) -> DbResponsePayload {
        let request_id = cmd.request_id.clone();
        match self.dispatch(cmd).await {
            Ok(payload) => DbResponsePayload {
                request_id,
                success: true,
                payload: Some(payload),
                error: None,
            },
            Err(e) => DbResponsePayload {
                request_id,
                success: false,
                payload: None,
                error: Some(e.to_string()),
            },
        }
    }

    async fn dispatch(&self, cmd: DbCommandPayload) -> Result<Value, DbInspectorError> {
        if matches!(cmd.kind, DbCommandKind::ListDatabases) {
            return Ok(self.list_databases());
        }

        let db_id = cmd
            .db_id
            .clone()
            .ok_or_else(|| DbInspectorError::InvalidQuery("missing dbId".to_owned()))?;
        let spec = self
            .databases
            .get(&db_id)
            .cloned()
            .ok_or(DbInspectorError::DatabaseNotFound(db_id))?;
        if spec.sensitive {
            return Err(DbInspectorError::AccessDenied);
        }

        match cmd.kind {
            DbCommandKind::ListDatabases => unreachable!("handled above"),
            DbCommandKind::ListTables => self.list_tables(&spec).await,
            DbCommandKind::DescribeTable => {
                let table = cmd
                    .table
                    .ok_or_else(|| DbInspectorError::InvalidQuery("missing table".to_owned()))?;
                self.describe_table(&spec, table).await
            }
            DbCommandKind::FetchTablePage => self.fetch_table_page(&spec, cmd).await,
            DbCommandKind::ExecuteQuery => {
                let query = cmd
                    .query
                    .ok_or_else(|| DbInspectorError::InvalidQuery("missing query".to_owned()))?;
                self.execute_query(&spec, query).await
            }
        }
    }

    fn list_databases(&self) -> Value {
        let mut entries: Vec<&DatabaseSpec> = self.databases.values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::json!({
            "databases": entries.iter().map(|d| serde_json::json!({
                "id": d.id,
                "label": d.label,
                "sensitive": d.sensitive,
            })).collect::<Vec<_>>(),
        })
    }

    async fn list_tables(&self, spec: &DatabaseSpec) -> Result<Value, DbInspectorError> {
        self.with_connection(spec, |conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::json!({ "tables": names }))
        })
        .await
    }

    async fn describe_table(
        &self,
        spec: &DatabaseSpec,
        table: String,
    ) -> Result<Value, DbInspectorError> {
        if !valid_identifier(&table) {
            return Err(DbInspectorError::InvalidQuery(format!(
                "invalid table name: {table}"
            )));
        }
        self.with_connection(spec, move |conn| {
            table_exists(conn, &table)?;
            let mut columns = Vec::new();
            conn.pragma_query(None, "table_info", &table, |row| {
                columns.push(serde_json::json!({
                    "name": row.get::<_, String>(1)?,
                    "type": row.get::<_, String>(2)?,
                    "notNull": row.get::<_, i64>(3)? != 0,
                    "defaultValue": row.get::<_, Option<String>>(4)?,
                    "primaryKey": row.get::<_, i64>(5)? != 0,
                }));
                Ok(())
            })?;
            Ok(serde_json::json!({ "table": table, "columns": columns }))
        })
        .await
    }

    async fn fetch_table_page(
        &self,
        spec: &DatabaseSpec,
        cmd: DbCommandPayload,
    ) -> Result<Value, DbInspectorError> {
        let table = cmd
            .table
            .ok_or_else(|| DbInspectorError::InvalidQuery("missing table".to_owned()))?;
        if !valid_identifier(&table) {
            return Err(DbInspectorError::InvalidQuery(format!(
                "invalid table name: {table}"
            )));
        }
        if let Some(order_by) = &cmd.order_by {
            if !valid_identifier(order_by) {
                return Err(DbInspectorError::InvalidQuery(format!(
                    "invalid orderBy column: {order_by}"
                )));
            }
        }
        let page = cmd.page.unwrap_or(1).max(1) as i64;
        let page_size = cmd.page_size.unwrap_or(50).clamp(1, MAX_PAGE_SIZE) as i64;
        let order_by = cmd.order_by;
        let ascending = cmd.ascending;

        self.with_connection(spec, move |conn| {
            table_exists(conn, &table)?;
            let offset = (page - 1) * page_size;
            let order_clause = match &order_by {
                Some(col) => format!("ORDER BY \"{col}\" {}", if ascending { "ASC" } else { "DESC" }),
                None => String::new(),
            };
            let sql = format!("SELECT * FROM \"{table}\" {order_clause} LIMIT ?1 OFFSET ?2");
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|s| (*s).to_owned())
                .collect();
            let rows = stmt
                .query_map(params![page_size, offset], |row| row_to_json(row, &columns))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::json!({
                "table": table,
                "page": page,
                "pageSize": page_size,
                "rows": rows,
            }))
        })
        .await
    }

    async fn execute_query(
        &self,
        spec: &DatabaseSpec,
        query: String,
    ) -> Result<Value, DbInspectorError> {
        let trimmed = query.trim().to_owned();
        let upper = trimmed.to_uppercase();
        if !upper.starts_with("SELECT") {
            return Err(DbInspectorError::InvalidQuery(
                "only SELECT queries are allowed".to_owned(),
            ));
        }
        for keyword in FORBIDDEN_KEYWORDS {
            if upper.contains(keyword) {
                return Err(DbInspectorError::InvalidQuery(format!(
                    "query contains forbidden keyword: {keyword}"
                )));
            }
        }

        self.with_connection(spec, move |conn| {
            let mut stmt = conn.prepare(&trimmed)?;
            let columns: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|s| (*s).to_owned())
                .collect();
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                if out.len() >= MAX_ROWS {
                    break;
                }
                out.push(row_to_json(row, &columns)?);
            }
            Ok(serde_json::json!({ "rows": out }))
        })
        .await
    }

    /// Run `f` against a fresh read-only connection on a blocking thread,
    /// racing it against the query timeout. On timeout, the connection's
    /// interrupt handle is fired and the blocking task is awaited to
    /// completion (so the underlying statement finishes unwinding) before
    /// returning [`DbInspectorError::Timeout`].
    async fn with_connection<T, F>(&self, spec: &DatabaseSpec, f: F) -> Result<T, DbInspectorError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DbInspectorError> + Send + 'static,
    {
        let path = spec.path.clone();
        let conn = tokio::task::spawn_blocking(move || open_read_only(&path))
            .await
            .map_err(|e| DbInspectorError::InternalError(e.to_string()))??;
        let interrupt_handle = conn.get_interrupt_handle();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let worker = tokio::task::spawn_blocking(move || {
            let _ = tx.send(f(&conn));
        });

        tokio::select! {
            () = tokio::time::sleep(self.query_timeout) => {
                interrupt_handle.interrupt();
                let _ = worker.await;
                Err(DbInspectorError::Timeout)
            }
            result = rx => result.map_err(|_| {
                DbInspectorError::InternalError("inspector worker task was dropped".to_owned())
            })?,
        }
    }
}

fn open_read_only(path: &Path) -> Result<Connection, DbInspectorError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn table_exists(conn: &Connection, table: &str) -> Result<(), DbInspectorError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    if count == 0 {
        return Err(DbInspectorError::TableNotFound(table.to_owned()));
    }
    Ok(())
}

fn row_to_json(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Value> {
    let mut obj = serde_json::Map::with_capacity(columns.len());
    for (i, name) in columns.iter().enumerate() {
        let value = match row.get_ref(i)? {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(n) => Value::from(n),
            rusqlite::types::ValueRef::Real(f) => {
                serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
            }
            rusqlite::types::ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            rusqlite::types::ValueRef::Blob(b) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
        };
        obj.insert(name.clone(), value);
    }
    Ok(Value::Object(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_protocol::DbCommandKind;

    fn seed_db(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL);
             INSERT INTO widgets (name, price) VALUES ('sprocket', 1.5), ('cog', 2.25), ('gear', 3.0);",
        )
        .unwrap();
        path
    }

    fn cmd(kind: DbCommandKind) -> DbCommandPayload {
        DbCommandPayload {
            request_id: "r1".to_owned(),
            kind,
            db_id: Some("main".to_owned()),
            table: None,
            page: None,
            page_size: None,
            order_by: None,
            ascending: false,
            query: None,
        }
    }

    #[tokio::test]
    async fn lists_registered_databases() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_db(&dir, "app.db");
        let inspector = DbInspector::new(vec![DatabaseSpec {
            id: "main".to_owned(),
            path,
            label: "App database".to_owned(),
            sensitive: false,
        }]);
        let response = inspector
            .handle(DbCommandPayload {
                db_id: None,
                ..cmd(DbCommandKind::ListDatabases)
            })
            .await;
        assert!(response.success);
        let dbs = response.payload.unwrap()["databases"].as_array().unwrap().clone();
        assert_eq!(dbs.len(), 1);
        assert_eq!(dbs[0]["id"], "main");
    }

    #[tokio::test]
    async fn lists_tables_and_describes_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_db(&dir, "app.db");
        let inspector = DbInspector::new(vec![DatabaseSpec {
            id: "main".to_owned(),
            path,
            label: "App database".to_owned(),
            sensitive: false,
        }]);

        let tables = inspector.handle(cmd(DbCommandKind::ListTables)).await;
        assert!(tables.success);
        assert_eq!(tables.payload.unwrap()["tables"][0], "widgets");

        let described = inspector
            .handle(DbCommandPayload {
                table: Some("widgets".to_owned()),
                ..cmd(DbCommandKind::DescribeTable)
            })
            .await;
        assert!(described.success);
        let columns = described.payload.unwrap()["columns"].as_array().unwrap().clone();
        assert_eq!(columns.len(), 3);
    }

    #[tokio::test]
    async fn fetches_a_table_page_in_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_db(&dir, "app.db");
        let inspector = DbInspector::new(vec![DatabaseSpec {
            id: "main".to_owned(),
            path,
            label: "App database".to_owned(),
            sensitive: false,
        }]);

        let response = inspector
            .handle(DbCommandPayload {
                table: Some("widgets".to_owned()),
                page: Some(1),
                page_size: Some(2),
                order_by: Some("price".to_owned()),
                ascending: false,
                ..cmd(DbCommandKind::FetchTablePage)
            })
            .await;
        assert!(response.success);
        let rows = response.payload.unwrap()["rows"].as_array().unwrap().clone();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "gear");
    }

    #[tokio::test]
    async fn rejects_non_select_and_dangerous_queries() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_db(&dir, "app.db");
        let inspector = DbInspector::new(vec![DatabaseSpec {
            id: "main".to_owned(),
            path,
            label: "App database".to_owned(),
            sensitive: false,
        }]);

        let response = inspector
            .handle(DbCommandPayload {
                query: Some("select * from widgets; drop table widgets;".to_owned()),
                ..cmd(DbCommandKind::ExecuteQuery)
            })
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("DROP"));
    }

    #[tokio::test]
    async fn runs_a_select_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_db(&dir, "app.db");
        let inspector = DbInspector::new(vec![DatabaseSpec {
            id: "main".to_owned(),
            path,
            label: "App database".to_owned(),
            sensitive: false,
        }]);

        let response = inspector
            .handle(DbCommandPayload {
                query: Some("select count(*) as n from widgets".to_owned()),
                ..cmd(DbCommandKind::ExecuteQuery)
            })
            .await;
        assert!(response.success);
        assert_eq!(response.payload.unwrap()["rows"][0]["n"], 3);
    }

    #[tokio::test]
    async fn sensitive_databases_deny_every_command_but_listing() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_db(&dir, "secrets.db");
        let inspector = DbInspector::new(vec![DatabaseSpec {
            id: "secrets".to_owned(),
            path,
            label: "Keychain mirror".to_owned(),
            sensitive: true,
        }]);

        let list = inspector
            .handle(DbCommandPayload {
                db_id: None,
                ..cmd(DbCommandKind::ListDatabases)
            })
            .await;
        assert!(list.success);

        let tables = inspector
            .handle(DbCommandPayload {
                db_id: Some("secrets".to_owned()),
                ..cmd(DbCommandKind::ListTables)
            })
            .await;
        assert!(!tables.success);
        assert_eq!(tables.error.unwrap(), "access denied");
    }

    #[tokio::test]
    async fn unknown_database_is_reported() {
        let inspector = DbInspector::new(vec![]);
        let response = inspector.handle(cmd(DbCommandKind::ListTables)).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("unknown database"));
    }

    #[tokio::test]
    async fn rejects_invalid_table_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_db(&dir, "app.db");
        let inspector = DbInspector::new(vec![DatabaseSpec {
            id: "main".to_owned(),
            path,
            label: "App database".to_owned(),
            sensitive: false,
        }]);
        let response = inspector
            .handle(DbCommandPayload {
                table: Some("widgets; drop table widgets;".to_owned()),
                ..cmd(DbCommandKind::DescribeTable)
            })
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("invalid table name"));
    }

    #[tokio::test(start_paused = true)]
    async fn long_running_query_is_interrupted_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_db(&dir, "app.db");
        let inspector =
            DbInspector::with_timeout(
                vec![DatabaseSpec {
                    id: "main".to_owned(),
                    path,
                    label: "App database".to_owned(),
                    sensitive: false,
                }],
                Duration::from_millis(50),
            );

        let handle = tokio::spawn(async move {
            inspector
                .handle(DbCommandPayload {
                    query: Some(
                        "select count(*) from (select 1 union all select 2) a, \
                         (with recursive spin(n) as (select 0 union all select n + 1 from spin) \
                          select n from spin limit 200000000) b"
                            .to_owned(),
                    ),
                    ..cmd(DbCommandKind::ExecuteQuery)
                })
                .await
        });
        tokio::time::advance(Duration::from_millis(60)).await;
        let response = handle.await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error.unwrap(), "query timed out");
    }
}
