use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, params};

use super::{Swap, SwapStatus};

/// Persisted swap store collaborator. Keyed by swap id, no transactions across
/// keys; single-writer semantics are the caller's concern.
pub trait SwapStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Swap>>;
    fn set(&self, swap: &Swap) -> Result<()>;
    fn delete(&self, id: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<Swap>>;
}

/// Advances a swap's locally observed status, but only to terminal values and
/// only forward. Returns whether the stored record changed.
pub fn update_swap_status(store: &dyn SwapStore, id: &str, new_status: &SwapStatus) -> Result<bool> {
    if !new_status.is_final() {
        return Ok(false);
    }

    let Some(mut swap) = store.get(id).with_context(|| format!("get swap {id}"))? else {
        return Ok(false);
    };

    if swap.status() == new_status {
        return Ok(false);
    }

    swap.base_mut().status = new_status.clone();
    store.set(&swap).with_context(|| format!("persist swap {id}"))?;
    Ok(true)
}

#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteSwapStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SwapStore for SqliteSwapStore {
    fn get(&self, id: &str) -> Result<Option<Swap>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM swaps WHERE swap_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("get swap {id}"))?;

        match data {
            Some(data) => {
                let swap = serde_json::from_str(&data)
                    .with_context(|| format!("decode swap {id}"))?;
                Ok(Some(swap))
            }
            None => Ok(None),
        }
    }

    fn set(&self, swap: &Swap) -> Result<()> {
        let data = serde_json::to_string(swap).context("encode swap")?;
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            r#"
INSERT INTO swaps (swap_id, kind, status, created_at, data)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(swap_id) DO UPDATE SET
  status = excluded.status,
  data = excluded.data
"#,
            params![
                swap.id(),
                kind_to_str(swap),
                swap.status().as_str(),
                swap.base().created_at,
                data,
            ],
        )
        .with_context(|| format!("persist swap {}", swap.id()))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute("DELETE FROM swaps WHERE swap_id = ?1", params![id])
            .with_context(|| format!("delete swap {id}"))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Swap>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn
            .prepare("SELECT data FROM swaps ORDER BY created_at DESC, swap_id")
            .context("prepare list swaps")?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query list swaps")?;

        let mut out = Vec::new();
        for row in rows {
            let data = row.context("read swap row")?;
            out.push(serde_json::from_str(&data).context("decode swap row")?);
        }
        Ok(out)
    }
}

fn kind_to_str(swap: &Swap) -> &'static str {
    match swap {
        Swap::Submarine(_) => "submarine",
        Swap::Reverse(_) => "reverse",
        Swap::Chain(_) => "chain",
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  status TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_status_idx ON swaps(status);
"#,
    )
    .context("create tables")?;
    Ok(())
}
