//! Main test module for hq
//!
//! This module includes all test suites:
//! - Integration tests for sign/verify scenarios
//! - Property-based tests for the map and container codecs
//! - Edge cases for unusual trees

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::hq::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn map_only() -> Hq {
        HqBuilder::new().map_only(true).workers(3).build().unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let hq = map_only();

        let signed = hq.dir_sign(temp_dir.path(), None).unwrap();
        assert_eq!(signed.files_total, 0);

        let report = hq.dir_verify(temp_dir.path()).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.files_total, 0);
        assert!(report.new_files.is_empty());

        // A file added after signing is the only thing reported
        fs::write(temp_dir.path().join("late.txt"), "content").unwrap();
        let report = hq.dir_verify(temp_dir.path()).unwrap();
        assert_eq!(report.new_files, vec![PathBuf::from("late.txt")]);
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let hq = map_only();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file@with#special$chars.txt",
            "file[with]brackets.txt",
            "ünïcödé.txt",
        ];
        let mut written = 0;
        for name in &special_names {
            if fs::write(temp_dir.path().join(name), format!("Content of {}", name)).is_ok() {
                written += 1;
            }
        }

        let signed = hq.dir_sign(temp_dir.path(), None).unwrap();
        assert_eq!(signed.files_total, written);

        let report = hq.dir_verify(temp_dir.path()).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.files_total, written);
        assert!(report.new_files.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_newline_in_name_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let hq = map_only();

        fs::write(temp_dir.path().join("plain.txt"), "ok").unwrap();
        fs::write(temp_dir.path().join("two\nlines.txt"), "skipped").unwrap();

        let signed = hq.dir_sign(temp_dir.path(), None).unwrap();
        assert_eq!(signed.files_total, 1);

        let report = hq.dir_verify(temp_dir.path()).unwrap();
        assert!(report.is_valid());
        assert!(report.new_files.is_empty());
    }

    #[test]
    fn test_empty_and_block_sized_files() {
        let temp_dir = TempDir::new().unwrap();
        let hq = map_only();

        fs::write(temp_dir.path().join("empty"), b"").unwrap();
        fs::write(temp_dir.path().join("one_block"), vec![7u8; 32 * 1024]).unwrap();
        fs::write(temp_dir.path().join("two_blocks"), vec![7u8; 64 * 1024]).unwrap();
        hq.dir_sign(temp_dir.path(), None).unwrap();

        // A one-byte write to an empty file is detected
        fs::write(temp_dir.path().join("empty"), b"x").unwrap();
        let report = hq.dir_verify(temp_dir.path()).unwrap();
        assert_eq!(report.files_fail, 1);
        assert_eq!(report.failures[0].path, PathBuf::from("empty"));
        assert_eq!(report.failures[0].reason, FailureReason::ContentMismatch);
    }

    #[test]
    fn test_verify_without_map() {
        let temp_dir = TempDir::new().unwrap();
        let err = map_only().dir_verify(temp_dir.path()).unwrap_err();
        assert!(matches!(err, HqError::MapNotFound { .. }));
    }
}
