pub mod error;
pub mod models;
pub mod reply;

pub use error::{Error, Result};
pub use models::{ImageAttachment, Interaction, Memory, NewUser, User};
pub use reply::ReplySink;
