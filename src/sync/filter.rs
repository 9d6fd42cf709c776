//! Include/exclude filter evaluation
//!
//! Precedence, first match decides:
//! 1. excluded sender (case-insensitive exact match) rejects
//! 2. excluded subject keyword (case-insensitive substring) rejects
//! 3. a selective policy (any include rule) accepts only on an include match
//! 4. otherwise accept

use crate::config::FilterPolicy;

impl FilterPolicy {
    /// Whether at least one include rule is configured
    pub fn is_selective(&self) -> bool {
        !self.include_senders.is_empty() || !self.include_keywords.is_empty()
    }
}

/// Decide whether a message should raise a notification
///
/// An empty sender never equals a non-empty sender rule, so unparseable
/// senders are only matched by keyword rules.
pub fn should_notify(policy: &FilterPolicy, sender_address: &str, subject: &str) -> bool {
    let subject = subject.to_lowercase();

    if policy
        .exclude_senders
        .iter()
        .any(|excluded| sender_matches(sender_address, excluded))
    {
        return false;
    }

    if policy
        .exclude_keywords
        .iter()
        .any(|keyword| keyword_matches(&subject, keyword))
    {
        return false;
    }

    if policy.is_selective() {
        if policy
            .include_senders
            .iter()
            .any(|included| sender_matches(sender_address, included))
        {
            return true;
        }
        return policy
            .include_keywords
            .iter()
            .any(|keyword| keyword_matches(&subject, keyword));
    }

    true
}

fn sender_matches(sender: &str, rule: &str) -> bool {
    sender.trim().to_lowercase() == rule.trim().to_lowercase()
}

// `subject` is already lowercased. Blank keywords never match.
fn keyword_matches(subject: &str, keyword: &str) -> bool {
    let keyword = keyword.trim();
    !keyword.is_empty() && subject.contains(&keyword.to_lowercase())
}

/// Extract the bare address from a From header value
///
/// `"Name <user@host>"` yields `user@host`; anything without angle brackets is
/// returned trimmed.
pub fn extract_email_address(from: &str) -> String {
    if let Some(start) = from.find('<') {
        if let Some(len) = from[start..].find('>') {
            return from[start + 1..start + len].trim().to_string();
        }
    }
    from.trim().to_string()
}
