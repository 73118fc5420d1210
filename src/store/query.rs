//! CQL statement templates.
//!
//! All statements operate under a fixed empty tenant; the tenancy column is
//! schema-reserved but unused.

/// Append raw samples to a point's data list.
pub fn raw_insert(table: &str) -> String {
    format!(
        "UPDATE {table} USING TTL ? SET data = data + ? \
         WHERE tenant='' AND rollup=? AND period=? AND path=? AND time=?"
    )
}

/// Replace a point's data list with an already-reduced singleton.
pub fn rollup_insert(table: &str) -> String {
    format!(
        "UPDATE {table} USING TTL ? SET data = ? \
         WHERE tenant='' AND rollup=? AND period=? AND path=? AND time=?"
    )
}

/// Multi-path range read with inclusive bounds.
pub fn range_fetch(table: &str) -> String {
    format!(
        "SELECT path, data, time FROM {table} \
         WHERE path IN ? AND tenant='' AND rollup=? AND period=? \
         AND time>=? AND time<=? ORDER BY time ASC"
    )
}

/// Single-path read over a half-open window, feeding rollups.
pub fn rollup_fetch(table: &str) -> String {
    format!(
        "SELECT data FROM {table} \
         WHERE path=? AND tenant='' AND rollup=? AND period=? \
         AND time>=? AND time<? ORDER BY time ASC"
    )
}

/// Keyspace selection.
pub fn use_keyspace(keyspace: &str) -> String {
    format!("USE {keyspace}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_insert_appends_to_list() {
        assert_eq!(
            raw_insert("metric"),
            "UPDATE metric USING TTL ? SET data = data + ? \
             WHERE tenant='' AND rollup=? AND period=? AND path=? AND time=?"
        );
    }

    #[test]
    fn test_rollup_insert_replaces_list() {
        assert_eq!(
            rollup_insert("metric"),
            "UPDATE metric USING TTL ? SET data = ? \
             WHERE tenant='' AND rollup=? AND period=? AND path=? AND time=?"
        );
    }

    #[test]
    fn test_range_fetch_is_inclusive_both_ends() {
        let cql = range_fetch("metric");
        assert!(cql.starts_with("SELECT path, data, time FROM metric"));
        assert!(cql.contains("time>=? AND time<=?"));
        assert!(cql.ends_with("ORDER BY time ASC"));
    }

    #[test]
    fn test_rollup_fetch_upper_bound_is_open() {
        let cql = rollup_fetch("metric");
        assert!(cql.starts_with("SELECT data FROM metric"));
        assert!(cql.contains("time>=? AND time<?"));
    }

    #[test]
    fn test_use_keyspace() {
        assert_eq!(use_keyspace("metrics"), "USE metrics");
    }
}
