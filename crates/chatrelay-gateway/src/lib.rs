pub mod admission;
pub mod app;
pub mod handler;

pub use admission::{AdmissionController, AdmissionPermit};
pub use app::ChatRelayApp;
pub use handler::BotHandler;
