//! Static work partitioning across independent workers
//!
//! Workers never talk to each other. Each one hashes every record's
//! partition key and keeps only the records that land on its own slot, so
//! N workers reading the same sheet split it into N disjoint sets.
//!
//! The hash is MD5 over the key's UTF-8 bytes: stable across runs,
//! processes and platforms, unlike `std`'s randomized `DefaultHasher`.

use crate::config::ShardSpec;
use crate::sheet::Record;

/// Map a key to its owning slot in `[0, total_slots)`
///
/// Returns 0 when `total_slots` is 0 (partitioning disabled).
pub fn owning_slot(key: &str, total_slots: usize) -> usize {
    if total_slots == 0 {
        return 0;
    }
    let digest = md5::compute(key.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (head as usize) % total_slots
}

/// Partition key for a record
///
/// The pre-resolved folder id (case-sensitive) when present, otherwise the
/// lowercased display name.
pub fn partition_key(record: &Record) -> String {
    match record.folder_id.as_deref() {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => record.name.trim().to_lowercase(),
    }
}

impl ShardSpec {
    /// Whether this worker owns the record
    pub fn owns(&self, record: &Record) -> bool {
        if !self.is_enabled() {
            return true;
        }
        owning_slot(&partition_key(record), self.total) == self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, folder_id: Option<&str>) -> Record {
        Record {
            name: name.to_string(),
            email: format!("{}@gmail.com", name.to_lowercase().replace(' ', ".")),
            folder_id: folder_id.map(str::to_string),
            ..Record::default()
        }
    }

    #[test]
    fn test_owning_slot_deterministic() {
        for n in 1..16 {
            for key in ["alice", "Bob Smith", "1AbCdEf", "", "ünïcödé"] {
                let slot = owning_slot(key, n);
                assert!(slot < n);
                assert_eq!(slot, owning_slot(key, n));
            }
        }
    }

    #[test]
    fn test_owning_slot_known_value() {
        // md5("abc") = 90015098...; 0x90015098 % 7
        assert_eq!(owning_slot("abc", 7), (0x9001_5098u32 % 7) as usize);
    }

    #[test]
    fn test_zero_slots_disables_partitioning() {
        assert_eq!(owning_slot("anything", 0), 0);
        let shard = ShardSpec::disabled();
        assert!(shard.owns(&record("Alice", None)));
        assert!(shard.owns(&record("Bob", Some("xyz"))));
    }

    #[test]
    fn test_partition_key_prefers_folder_id() {
        assert_eq!(partition_key(&record("Alice", Some("AbC123"))), "AbC123");
        assert_eq!(partition_key(&record("  Alice Smith ", None)), "alice smith");
        assert_eq!(partition_key(&record("Alice", Some("  "))), "alice");
    }

    #[test]
    fn test_shards_are_disjoint_and_complete() {
        let records: Vec<_> = (0..200)
            .map(|i| record(&format!("Person {}", i), None))
            .collect();

        let shards: Vec<_> = (0..4).map(|i| ShardSpec::new(4, i).unwrap()).collect();
        for r in &records {
            let owners = shards.iter().filter(|s| s.owns(r)).count();
            assert_eq!(owners, 1, "record {} owned by {} shards", r.name, owners);
        }
    }
}
