pub mod allowlist;
pub mod redaction;

pub use allowlist::Allowlist;
pub use redaction::{RedactingWriter, redact_secrets};
