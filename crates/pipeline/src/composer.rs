//! Prompt composition.

use voxchat_core::message::Message;
use voxchat_core::turn::Turn;

/// Build the message list for one generation call.
///
/// Layout: the system prompt, then each prior turn as a user/assistant pair
/// in the order given, then the new user input. The result always holds
/// `2 * history.len() + 2` messages. `history` must already be ordered
/// oldest first; stores guarantee this.
pub fn compose(system_prompt: &str, history: &[Turn], new_input: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2 * history.len() + 2);
    messages.push(Message::system(system_prompt));
    for turn in history {
        messages.push(Message::user(&turn.user_message));
        messages.push(Message::assistant(&turn.ai_message));
    }
    messages.push(Message::user(new_input));
    messages
}
