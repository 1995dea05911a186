//! Inbound message type and subject matching

/// One inbound delivery from the messaging client.
///
/// Constructed by the client library per delivery and consumed exactly once
/// by the dispatcher.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Subject the message was published to
    pub subject: String,

    /// Reply address for request/reply messages
    pub reply_to: Option<String>,

    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a plain message without a reply address
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            reply_to: None,
            payload,
        }
    }

    /// Create a request message carrying a reply address
    pub fn with_reply(
        subject: impl Into<String>,
        reply_to: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            subject: subject.into(),
            reply_to: Some(reply_to.into()),
            payload,
        }
    }

    /// Whether this message can be replied to
    pub fn expects_reply(&self) -> bool {
        self.reply_to.as_deref().is_some_and(|r| !r.is_empty())
    }
}

/// Check if a subject matches a subscription pattern
/// Supports wildcards: * (single token), > (rest of subject)
pub fn subject_matches(subject: &str, pattern: &str) -> bool {
    // Exact match
    if subject == pattern {
        return true;
    }

    let subject_parts: Vec<&str> = subject.split('.').collect();
    let pattern_parts: Vec<&str> = pattern.split('.').collect();

    let mut s_idx = 0;
    let mut p_idx = 0;

    while p_idx < pattern_parts.len() && s_idx < subject_parts.len() {
        match pattern_parts[p_idx] {
            ">" => return true, // Tail wildcard matches everything remaining
            "*" => {
                // Single-token wildcard matches one part
                s_idx += 1;
                p_idx += 1;
            }
            part => {
                if part != subject_parts[s_idx] {
                    return false;
                }
                s_idx += 1;
                p_idx += 1;
            }
        }
    }

    // Both must be exhausted for a match
    s_idx == subject_parts.len() && p_idx == pattern_parts.len()
}

/// Check whether a subject is valid for publishing (no wildcards, no empty
/// tokens)
pub fn is_publishable_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split('.')
            .all(|tok| !tok.is_empty() && tok != "*" && tok != ">")
}
