use chatrelay_common::{Interaction, Memory, NewUser, Result, User};

/// User and dialog persistence used by the orchestrator and the bot handler.
///
/// Implementations do their own locking; every method is a short blocking call.
pub trait Repository: Send + Sync {
    fn register_user(&self, user: &NewUser) -> Result<User>;

    fn get_user(&self, id: i64) -> Result<Option<User>>;

    /// Persist profile, dialog and model fields. Token counters are left
    /// alone; they only change through [`Repository::add_usage`].
    fn update_user(&self, user: &User) -> Result<()>;

    /// Store the user's current dialog id and last interaction time only.
    fn record_activity(&self, user: &User) -> Result<()>;

    /// Atomically add to the user's token counters.
    fn add_usage(&self, user_id: i64, input_tokens: u64, output_tokens: u64) -> Result<()>;

    fn add_interaction(&self, interaction: &Interaction) -> Result<()>;

    /// Interactions of the user's current dialog, oldest first.
    fn get_dialog_history(&self, user: &User) -> Result<Vec<Interaction>>;

    /// Remove and return the newest interaction of the user's current dialog.
    fn pop_latest_interaction(&self, user: &User) -> Result<Option<Interaction>>;
}

/// Per-user key/value facts exposed to the model through tools.
pub trait MemoryRepository: Send + Sync {
    /// Insert or overwrite the value stored under `key`.
    fn save_memory(&self, user_id: i64, key: &str, value: &str) -> Result<Memory>;

    fn get_memory(&self, user_id: i64, key: &str) -> Result<Option<Memory>>;

    /// All memories of a user sorted by key.
    fn list_memories(&self, user_id: i64) -> Result<Vec<Memory>>;

    /// Returns false when nothing was stored under `key`.
    fn delete_memory(&self, user_id: i64, key: &str) -> Result<bool>;
}
