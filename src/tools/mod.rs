// Tool policy: every tool carries a tier, and the tier decides whether the
// agent may run it directly or must first collect a nonce confirmation.

pub mod executor;

pub use executor::{ToolExecutionResult, ToolExecutor};

/// 0: harmless read, 1: personal-data read, 2: state-changing write,
/// 3: unknown/denied.
pub type ToolTier = u8;

pub struct ToolDefinition {
    pub name: &'static str,
    pub tier: ToolTier,
    pub description: &'static str,
}

pub const TOOL_REGISTRY: &[ToolDefinition] = &[
    ToolDefinition {
        name: "weather_forecast",
        tier: 0,
        description: "Fetch weather forecast",
    },
    ToolDefinition {
        name: "calendar_read",
        tier: 1,
        description: "Read calendar data",
    },
    ToolDefinition {
        name: "email_read",
        tier: 1,
        description: "Read email summaries",
    },
    ToolDefinition {
        name: "calendar_write_create",
        tier: 2,
        description: "Create calendar event",
    },
];

/// Unregistered tools land in the highest tier so they can never run.
pub fn tool_tier(tool_name: &str) -> ToolTier {
    TOOL_REGISTRY
        .iter()
        .find(|tool| tool.name == tool_name)
        .map(|tool| tool.tier)
        .unwrap_or(3)
}

pub fn requires_confirmation(tool_name: &str) -> bool {
    tool_tier(tool_name) >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_tools_run_without_confirmation() {
        assert_eq!(tool_tier("weather_forecast"), 0);
        assert_eq!(tool_tier("calendar_read"), 1);
        assert_eq!(tool_tier("email_read"), 1);
        assert!(!requires_confirmation("weather_forecast"));
        assert!(!requires_confirmation("calendar_read"));
        assert!(!requires_confirmation("email_read"));
    }

    #[test]
    fn writes_require_confirmation() {
        assert_eq!(tool_tier("calendar_write_create"), 2);
        assert!(requires_confirmation("calendar_write_create"));
    }

    #[test]
    fn unknown_tools_default_to_highest_tier() {
        assert_eq!(tool_tier("delete_everything"), 3);
        assert!(requires_confirmation("delete_everything"));
    }
}
