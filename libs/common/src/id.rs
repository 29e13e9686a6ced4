use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = gateway_common::id::prefixed_ulid("conn");
/// assert!(id.starts_with("conn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// One live transport connection.
    pub const CONNECTION: &str = "conn";
    /// Correlation ID for an RPC call that arrived without one.
    pub const OPERATION: &str = "op";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_have_prefix_and_ulid() {
        let id = prefixed_ulid(prefix::CONNECTION);
        let (p, ulid) = id.split_once('_').unwrap();
        assert_eq!(p, "conn");
        assert!(Ulid::from_string(ulid).is_ok());
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = prefixed_ulid(prefix::OPERATION);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = prefixed_ulid(prefix::OPERATION);
        assert!(a < b);
    }
}
