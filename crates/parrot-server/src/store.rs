use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parrot_contracts::{Settings, SpaceId, TriggerId, TriggerRecord, UserId};
use parrot_kernel::{encode_cooldown, encode_enabled, SETTING_COOLDOWN, SETTING_ENABLED};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store.data_dir is required for sqlite store")]
    MissingDataDir,
    #[error("unsupported store type: {0}")]
    UnsupportedKind(String),
}

/// Open connections kept per process; older spaces are reopened on demand.
const MAX_OPEN_SPACES: usize = 256;

/// Space-scoped record storage. Each space owns its own settings map and
/// trigger table, created with default settings on first access.
pub(crate) enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

pub(crate) struct MemoryStore {
    defaults: Settings,
    spaces: HashMap<SpaceId, MemorySpace>,
}

struct MemorySpace {
    settings: HashMap<String, String>,
    triggers: BTreeMap<TriggerId, TriggerRecord>,
    next_id: TriggerId,
}

/// One SQLite file per space under `data_dir`.
pub(crate) struct SqliteStore {
    data_dir: PathBuf,
    defaults: Settings,
    spaces: HashMap<SpaceId, Connection>,
    max_open: usize,
}

impl StoreBackend {
    pub(crate) fn open(
        kind: &str,
        data_dir: Option<&str>,
        defaults: Settings,
    ) -> Result<Self, StoreError> {
        match kind {
            "memory" => Ok(StoreBackend::Memory(MemoryStore::new(defaults))),
            "sqlite" => {
                let data_dir = data_dir.ok_or(StoreError::MissingDataDir)?;
                Ok(StoreBackend::Sqlite(SqliteStore::new(data_dir, defaults)?))
            }
            other => Err(StoreError::UnsupportedKind(other.to_string())),
        }
    }

    pub(crate) fn get_setting(
        &mut self,
        space: SpaceId,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.space(space).settings.get(name).cloned()),
            StoreBackend::Sqlite(store) => store.get_setting(space, name),
        }
    }

    pub(crate) fn set_setting(
        &mut self,
        space: SpaceId,
        name: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                store
                    .space(space)
                    .settings
                    .insert(name.to_string(), value.to_string());
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.set_setting(space, name, value),
        }
    }

    /// Live records in ascending id order.
    pub(crate) fn list_triggers(&mut self, space: SpaceId) -> Result<Vec<TriggerRecord>, StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                Ok(store.space(space).triggers.values().cloned().collect())
            }
            StoreBackend::Sqlite(store) => store.list_triggers(space),
        }
    }

    pub(crate) fn insert_trigger(
        &mut self,
        space: SpaceId,
        trigger: &str,
        response: &str,
        author_id: UserId,
    ) -> Result<TriggerId, StoreError> {
        match self {
            StoreBackend::Memory(store) => {
                let space = store.space(space);
                let id = space.next_id;
                space.next_id += 1;
                space.triggers.insert(
                    id,
                    TriggerRecord {
                        id,
                        trigger: trigger.to_string(),
                        response: response.to_string(),
                        author_id,
                    },
                );
                Ok(id)
            }
            StoreBackend::Sqlite(store) => store.insert_trigger(space, trigger, response, author_id),
        }
    }

    /// Returns whether a record was removed.
    pub(crate) fn delete_trigger(&mut self, space: SpaceId, id: TriggerId) -> Result<bool, StoreError> {
        match self {
            StoreBackend::Memory(store) => Ok(store.space(space).triggers.remove(&id).is_some()),
            StoreBackend::Sqlite(store) => store.delete_trigger(space, id),
        }
    }
}

impl MemoryStore {
    pub(crate) fn new(defaults: Settings) -> Self {
        Self {
            defaults,
            spaces: HashMap::new(),
        }
    }

    fn space(&mut self, space: SpaceId) -> &mut MemorySpace {
        let defaults = self.defaults;
        self.spaces.entry(space).or_insert_with(|| MemorySpace {
            settings: HashMap::from([
                (SETTING_ENABLED.to_string(), encode_enabled(defaults.enabled)),
                (
                    SETTING_COOLDOWN.to_string(),
                    encode_cooldown(defaults.cooldown_seconds),
                ),
            ]),
            triggers: BTreeMap::new(),
            next_id: 1,
        })
    }
}

impl SqliteStore {
    pub(crate) fn new(data_dir: &str, defaults: Settings) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            defaults,
            spaces: HashMap::new(),
            max_open: MAX_OPEN_SPACES,
        })
    }

    fn conn(&mut self, space: SpaceId) -> Result<&Connection, StoreError> {
        if self.spaces.len() >= self.max_open && !self.spaces.contains_key(&space) {
            let evicted = self.spaces.keys().next().copied();
            if let Some(evicted) = evicted {
                self.spaces.remove(&evicted);
            }
        }
        match self.spaces.entry(space) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let conn = open_space(&self.data_dir, space, &self.defaults)?;
                Ok(&*entry.insert(conn))
            }
        }
    }

    fn get_setting(&mut self, space: SpaceId, name: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn(space)?
            .query_row(
                "SELECT value FROM settings WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_setting(&mut self, space: SpaceId, name: &str, value: &str) -> Result<(), StoreError> {
        self.conn(space)?.execute(
            "
            INSERT INTO settings(name, value) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET value=excluded.value
            ",
            params![name, value],
        )?;
        Ok(())
    }

    fn list_triggers(&mut self, space: SpaceId) -> Result<Vec<TriggerRecord>, StoreError> {
        let conn = self.conn(space)?;
        let mut stmt =
            conn.prepare("SELECT id, pattern, response, author_id FROM triggers ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let author_id: i64 = row.get(3)?;
            Ok(TriggerRecord {
                id: id as TriggerId,
                trigger: row.get(1)?,
                response: row.get(2)?,
                author_id: author_id as UserId,
            })
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn insert_trigger(
        &mut self,
        space: SpaceId,
        trigger: &str,
        response: &str,
        author_id: UserId,
    ) -> Result<TriggerId, StoreError> {
        let conn = self.conn(space)?;
        conn.execute(
            "INSERT INTO triggers(pattern, response, author_id) VALUES (?1, ?2, ?3)",
            params![trigger, response, author_id as i64],
        )?;
        Ok(conn.last_insert_rowid() as TriggerId)
    }

    fn delete_trigger(&mut self, space: SpaceId, id: TriggerId) -> Result<bool, StoreError> {
        let changed = self
            .conn(space)?
            .execute("DELETE FROM triggers WHERE id = ?1", params![id as i64])?;
        Ok(changed > 0)
    }
}

fn open_space(data_dir: &Path, space: SpaceId, defaults: &Settings) -> Result<Connection, StoreError> {
    let conn = Connection::open(data_dir.join(format!("{space}.sqlite3")))?;
    // AUTOINCREMENT keeps ids of deleted rows from being handed out again.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS settings (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS triggers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern TEXT NOT NULL UNIQUE,
            response TEXT NOT NULL,
            author_id INTEGER NOT NULL
        );
        ",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO settings(name, value) VALUES (?1, ?2), (?3, ?4)",
        params![
            SETTING_ENABLED,
            encode_enabled(defaults.enabled),
            SETTING_COOLDOWN,
            encode_cooldown(defaults.cooldown_seconds)
        ],
    )?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("parrot-store-test-{nanos}"))
            .to_string_lossy()
            .to_string()
    }

    fn backends() -> Vec<StoreBackend> {
        vec![
            StoreBackend::Memory(MemoryStore::new(Settings::default())),
            StoreBackend::Sqlite(SqliteStore::new(&temp_dir(), Settings::default()).unwrap()),
        ]
    }

    #[test]
    fn fresh_space_gets_default_settings() {
        for mut store in backends() {
            assert_eq!(store.get_setting(1, SETTING_ENABLED).unwrap().as_deref(), Some("1"));
            assert_eq!(store.get_setting(1, SETTING_COOLDOWN).unwrap().as_deref(), Some("5"));
            assert_eq!(store.get_setting(1, "missing").unwrap(), None);
        }
    }

    #[test]
    fn ids_are_never_reused() {
        for mut store in backends() {
            let a = store.insert_trigger(1, "a", "ra", 9).unwrap();
            let b = store.insert_trigger(1, "b", "rb", 9).unwrap();
            assert!(store.delete_trigger(1, b).unwrap());
            let c = store.insert_trigger(1, "c", "rc", 9).unwrap();
            assert!(a < b && b < c);
            let ids: Vec<_> = store.list_triggers(1).unwrap().iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![a, c]);
        }
    }

    #[test]
    fn spaces_are_isolated() {
        for mut store in backends() {
            store.insert_trigger(1, "gm", "good morning", 9).unwrap();
            store.set_setting(1, SETTING_ENABLED, "0").unwrap();
            assert!(store.list_triggers(2).unwrap().is_empty());
            assert_eq!(store.get_setting(2, SETTING_ENABLED).unwrap().as_deref(), Some("1"));
        }
    }

    #[test]
    fn deleting_unknown_id_reports_nothing_removed() {
        for mut store in backends() {
            store.insert_trigger(1, "gm", "good morning", 9).unwrap();
            assert!(!store.delete_trigger(1, 9999).unwrap());
            assert_eq!(store.list_triggers(1).unwrap().len(), 1);
        }
    }

    #[test]
    fn sqlite_data_survives_reopen() {
        let dir = temp_dir();
        {
            let mut store = SqliteStore::new(&dir, Settings::default()).unwrap();
            store.insert_trigger(4, "gm", "good morning", 77).unwrap();
            store.set_setting(4, SETTING_COOLDOWN, "30").unwrap();
        }
        let mut store = StoreBackend::Sqlite(SqliteStore::new(&dir, Settings::default()).unwrap());
        let records = store.list_triggers(4).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].author_id, 77);
        assert_eq!(store.get_setting(4, SETTING_COOLDOWN).unwrap().as_deref(), Some("30"));
    }

    #[test]
    fn open_connections_are_bounded_and_reopen_from_disk() {
        let mut sqlite = SqliteStore::new(&temp_dir(), Settings::default()).unwrap();
        sqlite.max_open = 2;
        let mut store = StoreBackend::Sqlite(sqlite);
        for space in 1..=5 {
            store.insert_trigger(space, "gm", &format!("gm from {space}"), 9).unwrap();
        }
        if let StoreBackend::Sqlite(sqlite) = &store {
            assert!(sqlite.spaces.len() <= 2);
        }
        for space in 1..=5 {
            let records = store.list_triggers(space).unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].response, format!("gm from {space}"));
        }
    }

    #[test]
    fn sqlite_without_data_dir_is_refused() {
        assert!(matches!(
            StoreBackend::open("sqlite", None, Settings::default()),
            Err(StoreError::MissingDataDir)
        ));
        assert!(matches!(
            StoreBackend::open("redis", None, Settings::default()),
            Err(StoreError::UnsupportedKind(kind)) if kind == "redis"
        ));
        assert!(matches!(
            StoreBackend::open("memory", None, Settings::default()),
            Ok(StoreBackend::Memory(_))
        ));
    }
}
