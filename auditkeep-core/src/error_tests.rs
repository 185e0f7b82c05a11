/*!
Tests for error handling and error types.
*/

#[cfg(test)]
mod tests {
    use crate::error::LifecycleError;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_lifecycle_error_display() {
        let error = LifecycleError::invalid_policy("retention_days must be non-negative");
        assert_eq!(
            error.to_string(),
            "Invalid policy: retention_days must be non-negative"
        );

        let error = LifecycleError::storage("database is locked");
        assert_eq!(error.to_string(), "Storage error: database is locked");

        let error = LifecycleError::BackupNotFound(PathBuf::from("does/not/exist"));
        assert_eq!(error.to_string(), "Backup file not found: does/not/exist");
    }

    #[test]
    fn test_filesystem_error_carries_path_and_source() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "Access denied");
        let error = LifecycleError::filesystem("/var/archives", io_error);

        assert!(error.to_string().contains("/var/archives"));
        assert!(error.to_string().contains("Access denied"));

        use std::error::Error;
        assert!(error.source().is_some());
    }

    #[test]
    fn test_lifecycle_error_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error = LifecycleError::from(json_error);

        match error {
            LifecycleError::Json(_) => {} // Expected
            _ => panic!("Expected Json error variant"),
        }
    }

    #[test]
    fn test_lifecycle_error_from_sqlite_error() {
        let error = LifecycleError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(error, LifecycleError::Storage(_)));
    }

    #[test]
    fn test_partial_archive_mentions_file() {
        let error = LifecycleError::PartialArchive {
            archive_file: PathBuf::from("archives/audit_logs_20240101_000000.json.gz"),
            source: Box::new(LifecycleError::storage("disk I/O error")),
        };

        let message = error.to_string();
        assert!(message.contains("audit_logs_20240101_000000.json.gz"));
        assert!(message.contains("disk I/O error"));
    }

    #[test]
    fn test_maintenance_failed_lists_stages() {
        let error = LifecycleError::MaintenanceFailed(vec!["archive".into(), "backup".into()]);
        assert_eq!(error.to_string(), "Maintenance stages failed: archive, backup");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<LifecycleError>();
        assert_sync::<LifecycleError>();
    }
}
