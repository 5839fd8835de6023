//! Conversation id derivation.
//!
//! P2P conversations use `"p2p-"` + the two user uuids joined in
//! lexicographic order, so both participants derive the same id. Group
//! conversations use the group uuid verbatim; group uuids never begin with
//! the reserved `p2p-` prefix.

pub const P2P_PREFIX: &str = "p2p-";

pub fn p2p_conv_id(user_a: &str, user_b: &str) -> String {
    let (first, second) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{P2P_PREFIX}{first}-{second}")
}

pub fn is_p2p(conv_id: &str) -> bool {
    conv_id.starts_with(P2P_PREFIX)
}

/// Given one side of a P2P conv_id, return the other side.
/// Returns `None` when the id is malformed or `self_uuid` is not a member.
pub fn extract_peer_uuid(conv_id: &str, self_uuid: &str) -> Option<String> {
    let body = conv_id.strip_prefix(P2P_PREFIX)?;
    let (first, second) = body.split_once('-')?;

    if first == self_uuid {
        Some(second.to_string())
    } else if second == self_uuid {
        Some(first.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2p_id_is_order_independent() {
        assert_eq!(p2p_conv_id("U1", "U2"), "p2p-U1-U2");
        assert_eq!(p2p_conv_id("U2", "U1"), "p2p-U1-U2");
    }

    #[test]
    fn peer_extraction() {
        assert_eq!(extract_peer_uuid("p2p-alice-bob", "alice").as_deref(), Some("bob"));
        assert_eq!(extract_peer_uuid("p2p-alice-bob", "bob").as_deref(), Some("alice"));
        assert_eq!(extract_peer_uuid("p2p-alice-bob", "carol"), None);
        assert_eq!(extract_peer_uuid("group-1", "alice"), None);
    }

    #[test]
    fn group_ids_are_not_p2p() {
        assert!(is_p2p("p2p-U1-U2"));
        assert!(!is_p2p("7f9c2ba4e88f827d616045507605853e"));
    }
}
