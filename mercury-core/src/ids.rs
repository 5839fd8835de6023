use uuid::Uuid;

/// Globally unique message id. UUIDv7 puts the millisecond timestamp in the
/// high bits, so ids sort lexicographically in creation order.
pub fn new_msg_id() -> String {
    Uuid::now_v7().to_string()
}

/// Opaque id for a single transport connection.
pub fn new_connection_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_ids_sort_in_creation_order() {
        let a = new_msg_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_msg_id();
        assert!(a < b);
    }

    #[test]
    fn msg_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| new_msg_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
