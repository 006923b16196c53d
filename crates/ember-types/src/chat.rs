//! Deterministic identifiers for two-party conversations and call channels.
//!
//! Both peers compute the same id independently, so no negotiation round
//! trip is needed: the pair is sorted before joining.

use uuid::Uuid;

fn sorted_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    // Byte order of a Uuid matches the lexicographic order of its
    // hyphenated lowercase string form.
    if a <= b { (a, b) } else { (b, a) }
}

/// Conversation id for a two-party message thread, order-independent.
pub fn conversation_id(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = sorted_pair(a, b);
    format!("{lo}-{hi}")
}

/// Channel name for a video call between two users, order-independent.
pub fn call_channel(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = sorted_pair(a, b);
    format!("call_{lo}_{hi}")
}

/// Recover both participant ids from a conversation id.
/// The encoding is fixed-width: two 36-char uuids separated by `-`.
pub fn participants(conversation_id: &str) -> Option<(Uuid, Uuid)> {
    let (a, rest) = conversation_id.split_at_checked(36)?;
    let b = rest.strip_prefix('-')?;
    let a = Uuid::parse_str(a).ok()?;
    let b = Uuid::parse_str(b).ok()?;
    Some((a, b))
}

/// The other participant of a conversation, or None if `me` is not part
/// of it.
pub fn counterpart(conversation_id: &str, me: Uuid) -> Option<Uuid> {
    let (a, b) = participants(conversation_id)?;
    if a == me {
        Some(b)
    } else if b == me {
        Some(a)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(conversation_id(a, b), conversation_id(b, a));
        assert_eq!(call_channel(a, b), call_channel(b, a));
    }

    #[test]
    fn participants_round_trip() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let id = conversation_id(a, b);
        let (x, y) = participants(&id).unwrap();
        assert!((x, y) == (a, b) || (x, y) == (b, a));
    }

    #[test]
    fn counterpart_resolves_the_other_user() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let id = conversation_id(a, b);
        assert_eq!(counterpart(&id, a), Some(b));
        assert_eq!(counterpart(&id, b), Some(a));
        assert_eq!(counterpart(&id, Uuid::new_v4()), None);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(participants("not-a-conversation").is_none());
        assert!(participants("").is_none());
        let a = Uuid::new_v4();
        assert!(participants(&format!("{a}_{a}")).is_none());
    }
}
