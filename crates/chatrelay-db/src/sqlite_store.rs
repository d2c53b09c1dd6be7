use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chatrelay_common::{Error, ImageAttachment, Interaction, Memory, NewUser, Result, User};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use crate::migrations;
use crate::repository::{MemoryRepository, Repository};

/// SQLite-backed implementation of [`Repository`] and [`MemoryRepository`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;
        for migration in migrations::ALL {
            conn.execute_batch(migration.sql).map_err(|e| {
                Error::Database(format!("migration {} failed: {e}", migration.name))
            })?;
            debug!("applied migration {}", migration.name);
        }

        for (table, column, column_type) in migrations::ADDED_COLUMNS {
            let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {column_type}");
            if let Err(e) = conn.execute(&sql, []) {
                // Re-running against an up-to-date database.
                if !e.to_string().contains("duplicate column") {
                    return Err(Error::Database(format!(
                        "adding column {table}.{column} failed: {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("connection mutex poisoned".into()))
    }
}

impl Repository for SqliteStore {
    fn register_user(&self, user: &NewUser) -> Result<User> {
        let user = user.clone().into_user(Utc::now());
        self.lock()?
            .execute(
                "INSERT INTO users (id, first_name, last_name, username, chat_id,
                    input_tokens, output_tokens, current_dialog_id, last_interaction,
                    active, current_model)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 0, ?6, ?7, ?8)",
                params![
                    user.id,
                    user.first_name,
                    user.last_name,
                    user.username,
                    user.chat_id,
                    user.last_interaction.to_rfc3339(),
                    user.active,
                    user.current_model,
                ],
            )
            .map_err(|e| Error::Database(format!("failed to register user {}: {e}", user.id)))?;
        info!(user_id = user.id, active = user.active, "registered user");
        Ok(user)
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.lock()?
            .query_row(
                "SELECT id, first_name, last_name, username, chat_id, input_tokens,
                        output_tokens, current_dialog_id, last_interaction, active,
                        current_model
                 FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load user {id}: {e}")))
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE users SET first_name = ?2, last_name = ?3, username = ?4,
                    chat_id = ?5, current_dialog_id = ?6, last_interaction = ?7,
                    active = ?8, current_model = ?9
                 WHERE id = ?1",
                params![
                    user.id,
                    user.first_name,
                    user.last_name,
                    user.username,
                    user.chat_id,
                    user.current_dialog_id,
                    user.last_interaction.to_rfc3339(),
                    user.active,
                    user.current_model,
                ],
            )
            .map_err(|e| Error::Database(format!("failed to update user {}: {e}", user.id)))?;

        if changed == 0 {
            return Err(Error::Database(format!("user {} not found", user.id)));
        }
        Ok(())
    }

    fn record_activity(&self, user: &User) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE users SET current_dialog_id = ?2, last_interaction = ?3 WHERE id = ?1",
                params![
                    user.id,
                    user.current_dialog_id,
                    user.last_interaction.to_rfc3339()
                ],
            )
            .map_err(|e| {
                Error::Database(format!("failed to record activity of user {}: {e}", user.id))
            })?;

        if changed == 0 {
            return Err(Error::Database(format!("user {} not found", user.id)));
        }
        Ok(())
    }

    fn add_usage(&self, user_id: i64, input_tokens: u64, output_tokens: u64) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE users SET input_tokens = input_tokens + ?2,
                    output_tokens = output_tokens + ?3
                 WHERE id = ?1",
                params![user_id, input_tokens as i64, output_tokens as i64],
            )
            .map_err(|e| Error::Database(format!("failed to add usage for user {user_id}: {e}")))?;

        if changed == 0 {
            return Err(Error::Database(format!("user {user_id} not found")));
        }
        Ok(())
    }

    fn add_interaction(&self, interaction: &Interaction) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO interactions
                    (author_id, dialog_id, user_message, assistant_message, user_message_id,
                     user_image_type, user_image_data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    interaction.author_id,
                    interaction.dialog_id,
                    interaction.user_message,
                    interaction.assistant_message,
                    interaction.user_message_id,
                    interaction.user_image.as_ref().map(|i| i.media_type.as_str()),
                    interaction.user_image.as_ref().map(|i| i.data.as_str()),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to store interaction: {e}")))?;
        Ok(())
    }

    fn get_dialog_history(&self, user: &User) -> Result<Vec<Interaction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT author_id, dialog_id, user_message, assistant_message, user_message_id,
                        user_image_type, user_image_data
                 FROM interactions
                 WHERE author_id = ?1 AND dialog_id = ?2
                 ORDER BY id ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

        let rows = stmt
            .query_map(params![user.id, user.current_dialog_id], interaction_from_row)
            .map_err(|e| Error::Database(format!("failed to load history: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read history row: {e}")))
    }

    fn pop_latest_interaction(&self, user: &User) -> Result<Option<Interaction>> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        let latest = tx
            .query_row(
                "SELECT id, author_id, dialog_id, user_message, assistant_message, user_message_id,
                        user_image_type, user_image_data
                 FROM interactions
                 WHERE author_id = ?1 AND dialog_id = ?2
                 ORDER BY id DESC LIMIT 1",
                params![user.id, user.current_dialog_id],
                |row| Ok((row.get::<_, i64>(0)?, interaction_from_offset(row, 1)?)),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load latest interaction: {e}")))?;

        let Some((row_id, interaction)) = latest else {
            return Ok(None);
        };

        tx.execute("DELETE FROM interactions WHERE id = ?1", params![row_id])
            .map_err(|e| Error::Database(format!("failed to delete interaction: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit: {e}")))?;

        Ok(Some(interaction))
    }
}

impl MemoryRepository for SqliteStore {
    fn save_memory(&self, user_id: i64, key: &str, value: &str) -> Result<Memory> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO memories (user_id, memory_key, memory_value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(user_id, memory_key) DO UPDATE SET
               memory_value = excluded.memory_value,
               updated_at = excluded.updated_at",
            params![user_id, key, value, now],
        )
        .map_err(|e| Error::Database(format!("failed to save memory '{key}': {e}")))?;

        conn.query_row(
            "SELECT user_id, memory_key, memory_value, created_at, updated_at
             FROM memories WHERE user_id = ?1 AND memory_key = ?2",
            params![user_id, key],
            memory_from_row,
        )
        .map_err(|e| Error::Database(format!("failed to reload memory '{key}': {e}")))
    }

    fn get_memory(&self, user_id: i64, key: &str) -> Result<Option<Memory>> {
        self.lock()?
            .query_row(
                "SELECT user_id, memory_key, memory_value, created_at, updated_at
                 FROM memories WHERE user_id = ?1 AND memory_key = ?2",
                params![user_id, key],
                memory_from_row,
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to load memory '{key}': {e}")))
    }

    fn list_memories(&self, user_id: i64) -> Result<Vec<Memory>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, memory_key, memory_value, created_at, updated_at
                 FROM memories WHERE user_id = ?1
                 ORDER BY memory_key ASC",
            )
            .map_err(|e| Error::Database(format!("failed to prepare memory query: {e}")))?;

        let rows = stmt
            .query_map(params![user_id], memory_from_row)
            .map_err(|e| Error::Database(format!("failed to list memories: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read memory row: {e}")))
    }

    fn delete_memory(&self, user_id: i64, key: &str) -> Result<bool> {
        let deleted = self
            .lock()?
            .execute(
                "DELETE FROM memories WHERE user_id = ?1 AND memory_key = ?2",
                params![user_id, key],
            )
            .map_err(|e| Error::Database(format!("failed to delete memory '{key}': {e}")))?;
        Ok(deleted > 0)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let last_interaction: String = row.get(8)?;
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        username: row.get(3)?,
        chat_id: row.get(4)?,
        input_tokens: row.get::<_, i64>(5)?.max(0) as u64,
        output_tokens: row.get::<_, i64>(6)?.max(0) as u64,
        current_dialog_id: row.get(7)?,
        last_interaction: parse_timestamp(&last_interaction),
        active: row.get(9)?,
        current_model: row.get(10)?,
    })
}

fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    interaction_from_offset(row, 0)
}

fn interaction_from_offset(row: &Row<'_>, offset: usize) -> rusqlite::Result<Interaction> {
    Ok(Interaction {
        author_id: row.get(offset)?,
        dialog_id: row.get(offset + 1)?,
        user_message: row.get(offset + 2)?,
        assistant_message: row.get(offset + 3)?,
        user_message_id: row.get(offset + 4)?,
        user_image: image_from_columns(row.get(offset + 5)?, row.get(offset + 6)?),
    })
}

fn image_from_columns(
    media_type: Option<String>,
    data: Option<String>,
) -> Option<ImageAttachment> {
    Some(ImageAttachment {
        media_type: media_type?,
        data: data?,
    })
}

fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;
    Ok(Memory {
        user_id: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("failed to parse timestamp '{value}': {e}, falling back to now");
            Utc::now()
        })
}
