use std::fs;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::crypto::{SealedBlob, Sealer};
use crate::error::StorageError;
use crate::models::{Identity, KeyMaterial, Participants, SharedKeyRecord};

/// SQLite-backed persistence for the identity and its shared keys.
pub struct Storage {
    conn: Connection,
    sealer: Sealer,
}

impl Storage {
    pub fn open(path: &Path, sealer: Sealer) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, sealer)
    }

    /// Open `path`, starting over with an empty database when the existing
    /// file cannot be opened as one.
    pub fn open_or_recreate(path: &Path, sealer: Sealer) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match Connection::open(path)
            .map_err(StorageError::from)
            .and_then(create_schema)
        {
            Ok(conn) => Ok(Self { conn, sealer }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable database");
                remove_database_files(path)?;
                Self::open(path, sealer)
            }
        }
    }

    pub fn open_in_memory(sealer: Sealer) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?, sealer)
    }

    fn with_connection(conn: Connection, sealer: Sealer) -> Result<Self, StorageError> {
        let conn = create_schema(conn)?;
        Ok(Self { conn, sealer })
    }

    pub fn load_identity(&self) -> Result<Option<Identity>, StorageError> {
        let identity = self
            .conn
            .query_row(
                "SELECT username, public_key, certificate FROM identity WHERE id = 1",
                [],
                |row| {
                    Ok(Identity {
                        username: row.get(0)?,
                        public_key: row.get(1)?,
                        certificate: row.get(2)?,
                    })
                },
            )
            .optional()?;

        match identity {
            Some(identity) if identity.username.trim().is_empty() => {
                Err(StorageError::Malformed("identity without username".to_string()))
            }
            other => Ok(other),
        }
    }

    /// Load and unseal every key owned by `owner`. Any bad row fails the whole load.
    pub fn load_keys(&self, owner: &str) -> Result<Vec<SharedKeyRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_a, user_b, nonce, sealed_key FROM shared_keys WHERE owner = ?1",
        )?;
        let rows = stmt
            .query_map([owner], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    SealedBlob {
                        nonce: row.get(2)?,
                        ciphertext: row.get(3)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(user_a, user_b, sealed)| {
                let participants = Participants::new(&user_a, &user_b)
                    .filter(|p| p.contains(owner))
                    .ok_or_else(|| {
                        StorageError::Malformed(format!("key pair {}/{}", user_a, user_b))
                    })?;
                let key = self
                    .sealer
                    .open(owner, &participants.to_string(), &sealed)?;
                Ok(SharedKeyRecord::new(participants, KeyMaterial::new(key)))
            })
            .collect()
    }

    /// Replace everything persisted with `identity` and its key set.
    pub fn replace_session(
        &mut self,
        identity: &Identity,
        keys: &[SharedKeyRecord],
    ) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM shared_keys", [])?;
        tx.execute("DELETE FROM identity", [])?;
        tx.execute(
            "INSERT INTO identity (id, username, public_key, certificate, logged_in_at)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                identity.username,
                identity.public_key,
                identity.certificate,
                now
            ],
        )?;
        for record in keys {
            insert_key(&tx, &self.sealer, &identity.username, record, now)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert or overwrite the record for its pair.
    pub fn upsert_key(&self, owner: &str, record: &SharedKeyRecord) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        insert_key(&self.conn, &self.sealer, owner, record, now)
    }

    pub fn delete_key(&self, owner: &str, participants: &Participants) -> Result<(), StorageError> {
        self.conn.execute(
            "DELETE FROM shared_keys WHERE owner = ?1 AND user_a = ?2 AND user_b = ?3",
            params![owner, participants.first(), participants.second()],
        )?;
        Ok(())
    }

    pub fn wipe(&self) -> Result<(), StorageError> {
        self.conn
            .execute_batch("DELETE FROM shared_keys; DELETE FROM identity;")?;
        Ok(())
    }
}

fn create_schema(conn: Connection) -> Result<Connection, StorageError> {
    conn.execute_batch(
        "
        -- Authenticated identity (at most one row)
        CREATE TABLE IF NOT EXISTS identity (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            username TEXT NOT NULL,
            public_key TEXT NOT NULL,
            certificate TEXT NOT NULL,
            logged_in_at INTEGER NOT NULL
        );

        -- One sealed key per unordered pair, per owning user
        CREATE TABLE IF NOT EXISTS shared_keys (
            owner TEXT NOT NULL,
            user_a TEXT NOT NULL,
            user_b TEXT NOT NULL,
            nonce BLOB NOT NULL,
            sealed_key BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (owner, user_a, user_b),
            CHECK (user_a < user_b)
        );
        ",
    )?;
    Ok(conn)
}

/// Remove the database and any journal left next to it.
fn remove_database_files(path: &Path) -> Result<(), StorageError> {
    let mut paths = vec![path.to_path_buf()];
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(suffix);
        paths.push(name.into());
    }
    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn insert_key(
    conn: &Connection,
    sealer: &Sealer,
    owner: &str,
    record: &SharedKeyRecord,
    now: i64,
) -> Result<(), StorageError> {
    let participants = &record.participants;
    let sealed = sealer.seal(owner, &participants.to_string(), record.key.as_bytes())?;
    conn.execute(
        "INSERT INTO shared_keys (owner, user_a, user_b, nonce, sealed_key, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(owner, user_a, user_b) DO UPDATE SET
         nonce = ?4, sealed_key = ?5, updated_at = ?6",
        params![
            owner,
            participants.first(),
            participants.second(),
            sealed.nonce,
            sealed.ciphertext,
            now
        ],
    )?;
    Ok(())
}
