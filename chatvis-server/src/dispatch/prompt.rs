//! Builds the completion history for one agent cycle.

use shared::{llms::ChatTurn, models::StoredMessage};

/// Turn a fetched window into the history handed to the completion client.
///
/// With a system instruction, each turn is prefixed with `[id:<n>]` so the model can name a
/// reply target, and turns are tagged `assistant` when `agent_id` wrote them and `user`
/// otherwise. Without one, every message is a plain user turn.
#[must_use]
pub fn build_prompt(
    agent_id: i64,
    system_prompt: Option<&str>,
    window: &[StoredMessage],
) -> Vec<ChatTurn> {
    let Some(instruction) = system_prompt else {
        return window
            .iter()
            .map(|message| ChatTurn::user(message.content.clone()))
            .collect();
    };

    let mut history = Vec::with_capacity(window.len() + 1);
    history.push(ChatTurn::system(instruction));
    history.extend(window.iter().map(|message| {
        let content = format!("[id:{}] {}", message.id, message.content);
        if message.sender_id == agent_id {
            ChatTurn::assistant(content)
        } else {
            ChatTurn::user(content)
        }
    }));
    history
}
