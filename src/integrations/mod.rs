// Outbound integration clients. Each one renders a chat-ready string so
// tool results and heartbeat sections share the same formatting.

pub mod calendar;
pub mod gmail;
pub mod weather;

pub use calendar::{CalendarClient, CalendarRange};
pub use gmail::GmailClient;
pub use weather::WeatherClient;
