//! Shared timestamp/id helpers for state records and gate runs.

use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

/// Identifier attached to one gate-check invocation in log output.
pub fn new_run_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_epoch_z_format() {
        let result = now_epoch_z();
        assert!(result.ends_with('Z'));
        let numeric_part = result.trim_end_matches('Z');
        assert!(numeric_part.parse::<u64>().is_ok());
    }

    #[test]
    fn test_new_run_id_is_unique_ulid() {
        let id1 = new_run_id();
        let id2 = new_run_id();
        assert_ne!(id1, id2);
        assert!(ulid::Ulid::from_string(&id1).is_ok());
    }
}
