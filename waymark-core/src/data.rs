use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Row, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use waymark_scanner::explorer::{AbortReason, ExplorationOutcome, RunStats, Termination};
use waymark_scanner::hierarchy::HierarchyEdge;
use waymark_scanner::registry::{DiscoveredEntity, EntityId};

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    BoundReached,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::BoundReached => "bound_reached",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_termination(termination: &Termination) -> Self {
        match termination {
            Termination::Exhausted => SessionStatus::Completed,
            Termination::BoundReached(_) => SessionStatus::BoundReached,
            Termination::Aborted(AbortReason::Cancelled) => SessionStatus::Cancelled,
            Termination::Aborted(AbortReason::SessionLost(_)) => SessionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub seed_url: String,
    pub termination: Option<String>,
    pub stats: Option<RunStats>,
    pub entity_count: usize,
}

pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: DeserializeOwned>(column: usize, text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

impl Database {
    pub fn remove(path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS exploration_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL
        CHECK(status IN ('running', 'completed', 'bound_reached', 'failed', 'cancelled')),
    seed_url TEXT NOT NULL,
    configuration TEXT,       -- JSON ExplorerConfig
    termination TEXT,
    stats TEXT                -- JSON RunStats
);

-- One row per discovered entity page
CREATE TABLE IF NOT EXISTS entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    entity_index INTEGER NOT NULL,
    name TEXT NOT NULL,
    address TEXT NOT NULL,
    normalized_address TEXT NOT NULL,
    path TEXT NOT NULL,                 -- JSON array of steps
    relationship_fields TEXT NOT NULL,  -- JSON array of field names
    depth INTEGER NOT NULL,
    stale BOOLEAN NOT NULL DEFAULT 0,
    is_root BOOLEAN NOT NULL DEFAULT 0,
    discovered_at INTEGER NOT NULL,

    FOREIGN KEY(session_id) REFERENCES exploration_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, entity_index),
    UNIQUE(session_id, normalized_address)
);

CREATE INDEX IF NOT EXISTS idx_entities_session ON entities(session_id);
CREATE INDEX IF NOT EXISTS idx_entities_address ON entities(normalized_address);

CREATE TABLE IF NOT EXISTS entity_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    parent_index INTEGER NOT NULL,
    child_index INTEGER NOT NULL,
    via TEXT NOT NULL,

    FOREIGN KEY(session_id) REFERENCES exploration_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, parent_index, child_index)
);

CREATE INDEX IF NOT EXISTS idx_entity_edges_session ON entity_edges(session_id);
            ",
        )?;
        Ok(())
    }

    // Session management
    pub fn create_session(&self, seed_url: &str, configuration: &str) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO exploration_sessions (id, start_time, status, seed_url, configuration)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &session_id,
                timestamp,
                SessionStatus::Running.as_str(),
                seed_url,
                configuration
            ],
        )?;

        Ok(session_id)
    }

    pub fn fail_session(&self, session_id: &str) -> Result<()> {
        let timestamp = current_timestamp();
        self.conn.execute(
            "UPDATE exploration_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![SessionStatus::Failed.as_str(), timestamp, session_id],
        )?;
        Ok(())
    }

    /// Write every entity and edge of a run and close its session, all in
    /// one transaction.
    pub fn save_outcome(&self, session_id: &str, outcome: &ExplorationOutcome) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let timestamp = current_timestamp();

        {
            let mut insert_entity = tx.prepare(
                "INSERT INTO entities (
                    session_id, entity_index, name, address, normalized_address, path,
                    relationship_fields, depth, stale, is_root, discovered_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for entity in &outcome.entities {
                insert_entity.execute(params![
                    session_id,
                    entity.id.0 as i64,
                    &entity.name,
                    &entity.address,
                    entity.normalized_address(),
                    to_json(&entity.path)?,
                    to_json(&entity.relationship_field_names)?,
                    entity.depth as i64,
                    entity.stale,
                    entity.is_root,
                    timestamp,
                ])?;
            }

            let mut insert_edge = tx.prepare(
                "INSERT OR IGNORE INTO entity_edges (session_id, parent_index, child_index, via)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for edge in &outcome.hierarchy.edges {
                insert_edge.execute(params![
                    session_id,
                    edge.parent.0 as i64,
                    edge.child.0 as i64,
                    &edge.via,
                ])?;
            }
        }

        tx.execute(
            "UPDATE exploration_sessions
             SET status = ?1, end_time = ?2, termination = ?3, stats = ?4
             WHERE id = ?5",
            params![
                SessionStatus::from_termination(&outcome.termination).as_str(),
                timestamp,
                outcome.termination.as_str(),
                to_json(&outcome.stats)?,
                session_id,
            ],
        )?;

        tx.commit()
    }

    /// Normalized addresses of every entity ever saved.
    pub fn known_addresses(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT normalized_address FROM entities
             ORDER BY normalized_address",
        )?;

        let addresses = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;

        Ok(addresses)
    }

    pub fn load_edges(&self, session_id: &str) -> Result<Vec<HierarchyEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT parent_index, child_index, via FROM entity_edges
             WHERE session_id = ?1 ORDER BY id",
        )?;

        let edges = stmt
            .query_map(params![session_id], |row| {
                Ok(HierarchyEdge {
                    parent: EntityId(row.get::<_, i64>(0)? as u32),
                    child: EntityId(row.get::<_, i64>(1)? as u32),
                    via: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(edges)
    }

    /// Entities of one session in discovery order, with parents and children
    /// restored from the saved edges.
    pub fn load_entities(&self, session_id: &str) -> Result<Vec<DiscoveredEntity>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_index, name, address, path, relationship_fields, depth, stale, is_root
             FROM entities WHERE session_id = ?1 ORDER BY entity_index",
        )?;

        let mut entities = stmt
            .query_map(params![session_id], entity_from_row)?
            .collect::<Result<Vec<_>>>()?;

        let mut parents: BTreeMap<EntityId, BTreeSet<EntityId>> = BTreeMap::new();
        let mut children: BTreeMap<EntityId, BTreeSet<EntityId>> = BTreeMap::new();
        for edge in self.load_edges(session_id)? {
            parents.entry(edge.child).or_default().insert(edge.parent);
            children.entry(edge.parent).or_default().insert(edge.child);
        }
        for entity in &mut entities {
            entity.parents = parents.remove(&entity.id).unwrap_or_default();
            entity.children = children.remove(&entity.id).unwrap_or_default();
        }

        Ok(entities)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.start_time, s.end_time, s.status, s.seed_url, s.termination, s.stats,
                    (SELECT COUNT(*) FROM entities e WHERE e.session_id = s.id)
             FROM exploration_sessions s WHERE s.id = ?1",
        )?;

        stmt.query_row(params![session_id], session_from_row)
            .optional()
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.start_time, s.end_time, s.status, s.seed_url, s.termination, s.stats,
                    (SELECT COUNT(*) FROM entities e WHERE e.session_id = s.id)
             FROM exploration_sessions s
             ORDER BY s.start_time DESC, s.rowid DESC",
        )?;

        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>>>()?;

        Ok(sessions)
    }
}

fn entity_from_row(row: &Row) -> Result<DiscoveredEntity> {
    let address: String = row.get(2)?;
    let path: String = row.get(3)?;
    let fields: String = row.get(4)?;

    Ok(DiscoveredEntity {
        id: EntityId(row.get::<_, i64>(0)? as u32),
        name: row.get(1)?,
        address,
        path: from_json(3, &path)?,
        relationship_field_names: from_json(4, &fields)?,
        depth: row.get::<_, i64>(5)? as usize,
        parents: BTreeSet::new(),
        children: BTreeSet::new(),
        is_root: row.get(7)?,
        stale: row.get(6)?,
    })
}

fn session_from_row(row: &Row) -> Result<SessionSummary> {
    let stats = row
        .get::<_, Option<String>>(6)?
        .map(|text| from_json(6, &text))
        .transpose()?;

    Ok(SessionSummary {
        id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        status: row.get(3)?,
        seed_url: row.get(4)?,
        termination: row.get(5)?,
        stats,
        entity_count: row.get::<_, i64>(7)? as usize,
    })
}
