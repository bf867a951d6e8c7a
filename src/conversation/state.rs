use serde::Serialize;

/// Conversation phases as surfaced to status consumers. Listening intro and
/// outro visuals are currently disabled: locally detected speech keeps the
/// state in `Idle` and only toggles the processing flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    ListeningIntro,
    ListeningLoop,
    ListeningOutro,
    SpeakingIntro,
    SpeakingLoop,
    SpeakingOutro,
}

impl ConversationState {
    pub fn is_speaking(&self) -> bool {
        matches!(
            self,
            ConversationState::SpeakingIntro
                | ConversationState::SpeakingLoop
                | ConversationState::SpeakingOutro
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::ListeningIntro => "listening_intro",
            ConversationState::ListeningLoop => "listening_loop",
            ConversationState::ListeningOutro => "listening_outro",
            ConversationState::SpeakingIntro => "speaking_intro",
            ConversationState::SpeakingLoop => "speaking_loop",
            ConversationState::SpeakingOutro => "speaking_outro",
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
