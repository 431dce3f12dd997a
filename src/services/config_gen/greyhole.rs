//! greyhole.conf generation

use chrono::{DateTime, Utc};

use crate::domain::share::Share;
use crate::domain::storage::StoragePoolPartition;

use super::header;

/// Unit suffix of the `min_free` setting
pub const MIN_FREE_UNIT: &str = "gb";

/// Render the pool configuration.
///
/// One `storage_pool_drive` line per partition in input order, then one
/// `num_copies` line per share that takes part in the pool.
pub fn generate(
    partitions: &[StoragePoolPartition],
    shares: &[Share],
    now: DateTime<Utc>,
) -> String {
    let mut out = header("Storage pool configuration", now);
    out.push('\n');
    out.push_str("db_engine = sqlite\n");
    out.push_str("db_path = /var/cache/greyhole.sqlite\n");
    out.push_str("greyhole_log_file = /var/log/greyhole.log\n");
    out.push_str("log_level = INFO\n");
    out.push_str("email_to = root\n");
    out.push_str("delete_moves_to_trash = yes\n");

    out.push('\n');
    for partition in partitions {
        out.push_str(&format!(
            "storage_pool_drive = {}, min_free: {}{}\n",
            partition.pool_dir(),
            partition.minimum_free,
            MIN_FREE_UNIT
        ));
    }

    let pooled: Vec<&Share> = shares.iter().filter(|s| s.disk_pool_copies > 0).collect();
    if !pooled.is_empty() {
        out.push('\n');
        for share in pooled {
            out.push_str(&format!(
                "num_copies[{}] = {}\n",
                share.name, share.disk_pool_copies
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::config_gen::without_timestamp;
    use chrono::TimeZone;

    #[test]
    fn test_one_drive_line_per_partition_in_order() {
        let partitions = vec![
            StoragePoolPartition::new("/mnt/disk1", 10),
            StoragePoolPartition::new("/mnt/disk2", 20),
        ];
        let text = generate(&partitions, &[], Utc::now());
        let drives: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("storage_pool_drive"))
            .collect();

        assert_eq!(
            drives,
            vec![
                "storage_pool_drive = /mnt/disk1/gh, min_free: 10gb",
                "storage_pool_drive = /mnt/disk2/gh, min_free: 20gb",
            ]
        );
        assert!(!text.contains("num_copies"));
    }

    #[test]
    fn test_num_copies_for_pooled_shares_only() {
        let mut books = Share::new("Books", "/var/hda/files/books");
        books.disk_pool_copies = 2;
        let music = Share::new("Music", "/var/hda/files/music");

        let text = generate(
            &[StoragePoolPartition::new("/mnt/disk1", 10)],
            &[books, music],
            Utc::now(),
        );
        assert!(text.contains("num_copies[Books] = 2\n"));
        assert!(!text.contains("num_copies[Music]"));
    }

    #[test]
    fn test_deterministic_modulo_timestamp() {
        let partitions = vec![StoragePoolPartition::new("/mnt/disk1", 5)];
        let a = generate(&partitions, &[], Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let b = generate(&partitions, &[], Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(without_timestamp(&a), without_timestamp(&b));
    }
}
