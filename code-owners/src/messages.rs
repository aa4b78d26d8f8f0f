use serde::Serialize;

/// An explanatory message attached to a resolution result. The admin message
/// may mention things the user isn't allowed to see (e.g. hidden accounts);
/// the user message, if any, is safe to show to everyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugMessage {
    pub admin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl DebugMessage {
    pub fn admin_only(message: impl Into<String>) -> Self {
        Self {
            admin: message.into(),
            user: None,
        }
    }

    pub fn for_everyone(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            admin: message.clone(),
            user: Some(message),
        }
    }
}

/// A value that may be absent, together with the messages explaining how it
/// was computed, or why it couldn't be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalResultWithMessages<T> {
    pub value: Option<T>,
    pub messages: Vec<DebugMessage>,
}

impl<T> OptionalResultWithMessages<T> {
    pub fn of(value: T, messages: Vec<DebugMessage>) -> Self {
        Self {
            value: Some(value),
            messages,
        }
    }

    pub fn empty(messages: Vec<DebugMessage>) -> Self {
        Self {
            value: None,
            messages,
        }
    }
}
