use crate::models::{Message, Role};

const ASSISTANT_CUE: &str = "Assistant:";

pub fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "System",
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

/// Renders a conversation as one `<Role>: <content>` line per message, in order,
/// followed by a bare `Assistant:` cue line.
pub fn assemble(messages: &[Message]) -> String {
    let mut lines = messages
        .iter()
        .map(|message| format!("{}: {}", role_label(message.role), message.content))
        .collect::<Vec<_>>();
    lines.push(ASSISTANT_CUE.to_owned());
    lines.join("\n")
}

/// Models that decode the full sequence echo the prompt back; only the continuation is kept.
pub fn strip_prompt_echo<'a>(prompt: &str, output: &'a str) -> &'a str {
    output.strip_prefix(prompt).unwrap_or(output).trim()
}
