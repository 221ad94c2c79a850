use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use super::{ConnectionPool, StoreError};

/// Where a node runs: (agent host identity, node host, node port).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointIdentity {
    pub agent: String,
    pub host: String,
    pub port: u16,
}

/// Persisted `servers` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub server_name: String,
    pub agent_host: String,
    pub host: String,
    pub port: u16,
    pub last_seen: String,
}

/// Outcome of reconciling a registration with the persisted identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Endpoint unknown or already recorded under this name.
    Unchanged,
    /// Endpoint was recorded under `from`; the record now carries the new name.
    Renamed { from: String },
    /// Endpoint belongs to `holder`, which a local installation still claims.
    /// Nothing was written.
    PortConflict { holder: String },
}

/// `servers` table access.
pub struct ServerStore {
    pool: ConnectionPool,
}

impl ServerStore {
    pub fn open(path: &Path, pool_size: usize) -> Result<Self, StoreError> {
        let pool = ConnectionPool::open(path, pool_size)?;
        {
            let conn = pool.checkout()?;
            initialize_schema(&conn)?;
        }
        Ok(Self { pool })
    }

    /// Reconcile the endpoint's persisted name and upsert the record, in one transaction.
    ///
    /// `still_claimed` answers whether a local installation still uses a
    /// given server name; it decides between rename and port conflict.
    pub fn record_registration(
        &self,
        identity: &EndpointIdentity,
        server_name: &str,
        still_claimed: impl Fn(&str) -> bool,
    ) -> Result<Reconciliation, StoreError> {
        let mut conn = self.pool.checkout()?;
        let tx = conn.transaction()?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT server_name FROM servers
                 WHERE agent_host = ?1 AND host = ?2 AND port = ?3
                 ORDER BY last_seen DESC LIMIT 1",
                params![identity.agent, identity.host, identity.port],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match previous {
            Some(old) if old != server_name => {
                if still_claimed(&old) {
                    // tx drops here and rolls back
                    return Ok(Reconciliation::PortConflict { holder: old });
                }
                tx.execute("DELETE FROM servers WHERE server_name = ?1", params![server_name])?;
                tx.execute(
                    "UPDATE servers SET server_name = ?1 WHERE server_name = ?2",
                    params![server_name, old],
                )?;
                Reconciliation::Renamed { from: old }
            }
            _ => Reconciliation::Unchanged,
        };

        tx.execute(
            "INSERT INTO servers (server_name, agent_host, host, port, last_seen)
             VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT (server_name) DO UPDATE SET
                agent_host = excluded.agent_host,
                host = excluded.host,
                port = excluded.port,
                last_seen = excluded.last_seen",
            params![server_name, identity.agent, identity.host, identity.port],
        )?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get(&self, server_name: &str) -> Result<Option<ServerRecord>, StoreError> {
        let conn = self.pool.checkout()?;
        let rec = conn
            .query_row(
                "SELECT server_name, agent_host, host, port, last_seen
                 FROM servers WHERE server_name = ?1",
                params![server_name],
                |row| {
                    Ok(ServerRecord {
                        server_name: row.get(0)?,
                        agent_host: row.get(1)?,
                        host: row.get(2)?,
                        port: row.get(3)?,
                        last_seen: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(rec)
    }

    /// Persisted name for an endpoint (most recent record).
    pub fn server_name_at(
        &self,
        identity: &EndpointIdentity,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.pool.checkout()?;
        let name = conn
            .query_row(
                "SELECT server_name FROM servers
                 WHERE agent_host = ?1 AND host = ?2 AND port = ?3
                 ORDER BY last_seen DESC LIMIT 1",
                params![identity.agent, identity.host, identity.port],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.pool.checkout()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM servers", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Seed or overwrite a record directly (migrations, tests).
    pub fn upsert(&self, identity: &EndpointIdentity, server_name: &str) -> Result<(), StoreError> {
        let conn = self.pool.checkout()?;
        conn.execute(
            "INSERT INTO servers (server_name, agent_host, host, port, last_seen)
             VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT (server_name) DO UPDATE SET
                agent_host = excluded.agent_host,
                host = excluded.host,
                port = excluded.port,
                last_seen = excluded.last_seen",
            params![server_name, identity.agent, identity.host, identity.port],
        )?;
        Ok(())
    }
}

fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS servers (
            server_name TEXT PRIMARY KEY NOT NULL,
            agent_host  TEXT NOT NULL,
            host        TEXT NOT NULL,
            port        INTEGER NOT NULL,
            last_seen   TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS servers_endpoint ON servers (agent_host, host, port);",
    )?;
    Ok(())
}
