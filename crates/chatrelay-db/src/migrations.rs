/// A named, idempotent schema script.
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub const SCHEMA_V1: Migration = Migration {
    name: "v1_users_interactions_memories",
    sql: "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT,
            username TEXT,
            chat_id INTEGER NOT NULL,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            current_dialog_id INTEGER NOT NULL DEFAULT 0,
            last_interaction TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            current_model TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS interactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id INTEGER NOT NULL REFERENCES users(id),
            dialog_id INTEGER NOT NULL,
            user_message TEXT NOT NULL,
            assistant_message TEXT NOT NULL,
            user_message_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_interactions_dialog
            ON interactions(author_id, dialog_id, id);

        CREATE TABLE IF NOT EXISTS memories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            memory_key TEXT NOT NULL,
            memory_value TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, memory_key)
        );",
};

pub const ALL: &[Migration] = &[SCHEMA_V1];

/// Columns added after v1 as `(table, column, type)`. Applied with
/// `ALTER TABLE`, skipping columns that already exist.
pub const ADDED_COLUMNS: &[(&str, &str, &str)] = &[
    ("interactions", "user_image_type", "TEXT"),
    ("interactions", "user_image_data", "TEXT"),
];
