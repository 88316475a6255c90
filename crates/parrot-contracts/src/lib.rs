use serde::{Deserialize, Serialize};

pub const CONTRACT_VERSION: u32 = 1;

pub type SpaceId = u64;
pub type UserId = u64;
pub type TriggerId = u64;

/// Per-space switches, stored as strings by the record store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub enabled: bool,
    pub cooldown_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TriggerRecord {
    pub id: TriggerId,
    /// Always lower-cased.
    pub trigger: String,
    pub response: String,
    pub author_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Author {
    pub id: UserId,
    #[serde(default)]
    pub bot: bool,
}

/// One inbound chat message. `space_id` is absent for direct messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageEvent {
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    pub author: Author,
    pub content: String,
    /// RFC3339; the server clock is used when absent.
    #[serde(default)]
    pub ts: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplyReason {
    Replied,
    IgnoredAutomatedAuthor,
    IgnoredOutOfScope,
    Disabled,
    CoolingDown,
    NoMatch,
    StoreUnavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReplyPlan {
    pub v: u32,
    pub space_id: Option<SpaceId>,
    pub reply: Option<String>,
    pub reason_code: ReplyReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<TriggerId>,
}

impl ReplyPlan {
    pub fn silent(space_id: Option<SpaceId>, reason_code: ReplyReason) -> Self {
        Self {
            v: CONTRACT_VERSION,
            space_id,
            reply: None,
            reason_code,
            trigger_id: None,
        }
    }

    pub fn reply(space_id: SpaceId, record: &TriggerRecord) -> Self {
        Self {
            v: CONTRACT_VERSION,
            space_id: Some(space_id),
            reply: Some(record.response.clone()),
            reason_code: ReplyReason::Replied,
            trigger_id: Some(record.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpaceCommand {
    #[serde(default)]
    pub space_id: Option<SpaceId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetEnabledCommand {
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    pub enabled: bool,
}

/// Signed on the wire so that negative values reach the command layer and
/// get a proper rejection instead of a deserialization failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetCooldownCommand {
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    pub cooldown_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddTriggerCommand {
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    pub trigger: String,
    pub response: String,
    pub author_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoveTriggerCommand {
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    pub id: TriggerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutocompleteQuery {
    #[serde(default)]
    pub space_id: Option<SpaceId>,
    #[serde(default)]
    pub current: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AutocompleteChoice {
    pub id: TriggerId,
    pub trigger: String,
    pub label: String,
}

impl AutocompleteChoice {
    pub fn from_record(record: &TriggerRecord) -> Self {
        Self {
            id: record.id,
            trigger: record.trigger.clone(),
            label: format!("{} : {}", record.id, record.trigger),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandOutcome {
    pub ok: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TriggerList {
    pub space_id: SpaceId,
    pub triggers: Vec<TriggerRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_event_without_space_or_ts_parses() {
        let event: MessageEvent = serde_json::from_value(json!({
            "author": {"id": 7},
            "content": "gm"
        }))
        .unwrap();
        assert!(event.space_id.is_none());
        assert!(event.ts.is_none());
        assert!(!event.author.bot);
    }

    #[test]
    fn message_event_rejects_unknown_fields() {
        let parsed = serde_json::from_value::<MessageEvent>(json!({
            "space_id": 1,
            "author": {"id": 7},
            "content": "gm",
            "channel": "general"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn silent_plan_omits_trigger_id() {
        let plan = ReplyPlan::silent(Some(3), ReplyReason::CoolingDown);
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["reason_code"], "cooling_down");
        assert!(value["reply"].is_null());
        assert!(value.get("trigger_id").is_none());
    }

    #[test]
    fn autocomplete_label_shows_id_and_trigger() {
        let record = TriggerRecord {
            id: 12,
            trigger: "gm".to_string(),
            response: "good morning".to_string(),
            author_id: 1,
        };
        assert_eq!(AutocompleteChoice::from_record(&record).label, "12 : gm");
    }

    #[test]
    fn default_settings_are_enabled_with_five_second_cooldown() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert_eq!(settings.cooldown_seconds, 5);
    }
}
