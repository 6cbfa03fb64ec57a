//! Deterministic name derivation (spec glossary: "Deterministic content
//! name"). Names are computed from the snapshot's identity (name + UID)
//! so that retries after an opaque failure converge on the same backing
//! object / physical snapshot instead of leaking duplicates.

/// Name of the `VolumeSnapshotContent` the common reconciler creates for
/// a dynamic snapshot (spec §4.6 step 4, scenario 1: `snapcontent-U1`).
pub fn content_name(snapshot_uid: &str) -> String {
    format!("snapcontent-{snapshot_uid}")
}

/// Name passed to the driver's `createSnapshot` call (spec §4.1: "a
/// caller-chosen name that deterministically derives from the
/// user-facing snapshot's identity"; scenario 1: `snapshot-U1`).
///
/// `prefix` and `uuid_length` correspond to `--snapshot-name-prefix` /
/// `--snapshot-name-uuid-length`; a `uuid_length` of 0 keeps the full
/// UID (the default, and what the seed scenarios assume).
pub fn physical_snapshot_name(prefix: &str, snapshot_uid: &str, uuid_length: usize) -> String {
    let uid_part = if uuid_length == 0 || uuid_length >= snapshot_uid.len() {
        snapshot_uid
    } else {
        &snapshot_uid[..uuid_length]
    };
    format!("{prefix}-{uid_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_name_matches_scenario_1() {
        assert_eq!(content_name("U1"), "snapcontent-U1");
    }

    #[test]
    fn physical_name_matches_scenario_1() {
        assert_eq!(physical_snapshot_name("snapshot", "U1", 0), "snapshot-U1");
    }

    #[test]
    fn physical_name_truncates_uuid_when_configured() {
        assert_eq!(
            physical_snapshot_name("snapshot", "abcdefgh-1234", 8),
            "snapshot-abcdefgh"
        );
    }

    #[test]
    fn retry_converges_on_same_names() {
        // Same snapshot identity, two separate reconcile ticks: names
        // must be identical so a retried createSnapshot call coalesces.
        let first = physical_snapshot_name("snapshot", "U1", 0);
        let second = physical_snapshot_name("snapshot", "U1", 0);
        assert_eq!(first, second);
    }
}
