pub mod markup;
pub mod shaper;
#[cfg(feature = "telegram")]
pub mod telegram;
pub mod traits;

pub use markup::{MAX_CLOSING_LEN, repair_markup};
pub use shaper::{DELIVERY_FAILED_NOTICE, MessageShaper, ShaperLimits};
#[cfg(feature = "telegram")]
pub use telegram::{TelegramChannel, TelegramTransport};
pub use traits::{
    ChannelLifecycle, ChannelStatus, ChatTransport, IncomingContent, IncomingMessage,
    MessageHandle, Recipient, UpdateHandler,
};
