// Telegram intake: typed update models, the bot API client, exactly-once
// long polling and the per-update router.

pub mod client;
pub mod poller;
pub mod router;
pub mod types;

pub use client::{TelegramClient, Transport, UpdateSource};
pub use poller::{OffsetStore, UpdateDedupe, UpdatePoller};
pub use router::UpdateRouter;
pub use types::{TelegramChat, TelegramMessage, TelegramUpdate, TelegramUser};
