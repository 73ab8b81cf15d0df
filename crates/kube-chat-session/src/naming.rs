//! Default session names and titles derived from the first message.

use kube_chat_core::Session;

const DEFAULT_PREFIX: &str = "Session ";

/// Characters kept when deriving a title.
pub const TITLE_CHARS: usize = 20;

/// Name given to the `n`th session.
#[must_use]
pub fn default_name(n: usize) -> String {
    format!("{DEFAULT_PREFIX}{n}")
}

/// Whether `name` still has the `Session <number>` shape.
#[must_use]
pub fn is_default_name(name: &str) -> bool {
    name.strip_prefix(DEFAULT_PREFIX)
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Whether a session may still be renamed automatically.
#[must_use]
pub fn is_eligible(session: &Session) -> bool {
    session.messages.is_empty() || is_default_name(&session.name)
}

/// Title for a session whose first message is `input`.
///
/// A leading `/verb` token is dropped. Returns `None` when nothing is left.
#[must_use]
pub fn title_from(input: &str) -> Option<String> {
    let mut text = input.trim();
    if let Some(rest) = text.strip_prefix('/') {
        text = rest.split_once(char::is_whitespace).map_or("", |(_, args)| args.trim());
    }
    if text.is_empty() {
        return None;
    }
    let mut chars = text.chars();
    let mut title: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        title.push_str("...");
    }
    Some(title)
}
