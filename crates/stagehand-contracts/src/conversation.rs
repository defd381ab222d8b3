use crate::actions::ActionOutcome;

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged turn. The whole conversation is an ordered list of
/// these, passed by value into each translation step so retries resend
/// every prior turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// User turn for the first translation attempt.
pub fn opening_turn(state_description: &str, instruction: &str) -> Turn {
    Turn::user(format!(
        "Current state of the video production app:\n\n{state_description}\n\nInstruction: {instruction}"
    ))
}

/// User turn for a retry attempt: the failures from the previous batch
/// plus a fresh state description, asking for a corrected batch that
/// does not repeat the calls that already succeeded.
pub fn retry_turn(failed: &[ActionOutcome], state_description: &str) -> Turn {
    let mut lines = Vec::with_capacity(failed.len());
    for outcome in failed {
        lines.push(format!("- {}", outcome.feedback_line()));
    }
    Turn::user(format!(
        "These calls from your previous batch failed:\n\n{}\n\nCurrent state of the video production app:\n\n{state_description}\n\nReply with a corrected JSON array of calls. Do not repeat calls that already succeeded.",
        lines.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use crate::actions::{ActionCall, ActionOutcome};

    use super::{opening_turn, retry_turn, Role};

    #[test]
    fn opening_turn_carries_state_and_instruction() {
        let turn = opening_turn("Scenes: Main", "mute the mic");
        assert_eq!(turn.role, Role::User);
        assert!(turn.content.contains("Scenes: Main"));
        assert!(turn.content.contains("Instruction: mute the mic"));
    }

    #[test]
    fn retry_turn_lists_only_failures() {
        let failed = vec![ActionOutcome::failure(
            ActionCall::new("GetSceneList"),
            "socket closed",
        )];
        let turn = retry_turn(&failed, "Scenes: Main");
        assert_eq!(turn.role, Role::User);
        assert!(turn.content.contains("- GetSceneList: socket closed"));
        assert!(turn.content.contains("Do not repeat"));
    }
}
