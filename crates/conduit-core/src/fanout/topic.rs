//! Topic grammar and broker channel naming.

use crate::error::{ConduitError, ConduitResult};

/// Default `keyPrefix` when a [`super::provider::FanoutProviderConfig`]
/// doesn't override it.
pub const DEFAULT_KEY_PREFIX: &str = "ws";

const MAX_TOPIC_BYTES: usize = 256;

/// Validate a topic: non-empty, ≤ 256 bytes, letters/digits/`:`/`-`/`_`/`.`
/// only — rejecting control characters and glob wildcards by construction.
pub fn validate_topic(topic: &str) -> ConduitResult<()> {
    if topic.is_empty() {
        return Err(ConduitError::InvalidArgument("topic must be non-empty".to_string()));
    }
    if topic.len() > MAX_TOPIC_BYTES {
        return Err(ConduitError::InvalidArgument(format!(
            "topic exceeds {MAX_TOPIC_BYTES} bytes: {} bytes",
            topic.len()
        )));
    }
    if !topic.chars().all(is_allowed_topic_char) {
        return Err(ConduitError::InvalidArgument(format!("topic contains disallowed characters: {topic:?}")));
    }
    Ok(())
}

fn is_allowed_topic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.')
}

/// Broker channel for `topic` under `key_prefix`: `keyPrefix + ":" + topic`.
pub fn channel_name(key_prefix: &str, topic: &str) -> String {
    format!("{key_prefix}:{topic}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_topics() {
        assert!(validate_topic("account:123").is_ok());
        assert!(validate_topic("order.updates-v2").is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(validate_topic("").is_err());
        assert!(validate_topic(&"a".repeat(257)).is_err());
        assert!(validate_topic(&"a".repeat(256)).is_ok());
    }

    #[test]
    fn rejects_wildcards_and_control_chars() {
        assert!(validate_topic("foo.*").is_err());
        assert!(validate_topic("foo?bar").is_err());
        assert!(validate_topic("foo[bar]").is_err());
        assert!(validate_topic("foo\nbar").is_err());
    }

    #[test]
    fn channel_name_prefixes_with_key() {
        assert_eq!(channel_name("ws", "account:123"), "ws:account:123");
    }

    proptest::proptest! {
        #[test]
        fn any_string_of_allowed_chars_within_length_validates(
            topic in "[a-zA-Z0-9:._-]{1,256}"
        ) {
            proptest::prop_assert!(validate_topic(&topic).is_ok());
        }

        #[test]
        fn any_string_containing_a_disallowed_char_is_rejected(
            prefix in "[a-zA-Z0-9:._-]{0,16}",
            suffix in "[a-zA-Z0-9:._-]{0,16}",
        ) {
            let topic = format!("{prefix}*{suffix}");
            proptest::prop_assert!(validate_topic(&topic).is_err());
        }
    }
}
