// Domain services layered between the Telegram intake and the stores.

pub mod agent;
pub mod confirmation;
pub mod conversation;
pub mod google_oauth;
pub mod heartbeat_config;
pub mod integrations;
pub mod ownership;
pub mod rate_limit;

pub use agent::AgentService;
pub use confirmation::ConfirmationService;
pub use conversation::ConversationMemory;
pub use google_oauth::{GoogleKind, GoogleOAuthService};
pub use heartbeat_config::HeartbeatConfigService;
pub use integrations::IntegrationService;
pub use ownership::{ClaimResult, OwnershipService};
pub use rate_limit::RateLimiter;
