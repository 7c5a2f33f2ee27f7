//! Integration tests for hq
//!
//! Runs signed sign/verify cycles over real trees and checks how each kind of
//! change is reported.

use ::hq::map::{encode_record, map_file_name, MapParser};
use ::hq::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::info;
use tracing_test::traced_test;

/// Test harness holding a tree, a keystore and an unlocked identity
pub struct HqTestHarness {
    pub root: TempDir,
    pub keys: TempDir,
    pub hq: Hq,
    pub identity: Identity,
}

impl HqTestHarness {
    /// Create a harness with a generated default identity
    pub fn new() -> Self {
        Self::with_builder(|b| b)
    }

    /// Create a harness, letting the caller adjust the builder
    pub fn with_builder(adjust: impl FnOnce(HqBuilder) -> HqBuilder) -> Self {
        let root = TempDir::new().unwrap();
        let keys = TempDir::new().unwrap();
        let hq = adjust(HqBuilder::new().keystore(keys.path()).workers(4))
            .build()
            .unwrap();

        let owner = Owner::new("integration@example").unwrap();
        hq.generate(owner.clone(), b"first secret", b"second secret", true)
            .unwrap();
        let identity = Identity::unlock(owner, b"first secret", b"second secret");

        Self {
            root,
            keys,
            hq,
            identity,
        }
    }

    /// Rebuild the facade over the same keystore with different settings
    pub fn rebuild(&mut self, adjust: impl FnOnce(HqBuilder) -> HqBuilder) {
        self.hq = adjust(HqBuilder::new().keystore(self.keys.path()).workers(4))
            .build()
            .unwrap();
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn write(&self, rel: &str, content: impl AsRef<[u8]>) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn sign(&self) -> SignReport {
        self.hq.dir_sign(self.path(), Some(&self.identity)).unwrap()
    }

    pub fn verify(&self) -> VerifyReport {
        self.hq.dir_verify(self.path()).unwrap()
    }

    /// Generate a nested project with `dirs * files` files
    pub fn generate_project(&self, dirs: usize, files: usize) -> u64 {
        for d in 0..dirs {
            for f in 0..files {
                self.write(
                    &format!("module{}/sub{}/file{}.txt", d, f % 3, f),
                    format!("module {} file {}\n", d, f).repeat(f + 1),
                );
            }
        }
        (dirs * files) as u64
    }
}

fn reasons(report: &VerifyReport) -> Vec<(PathBuf, u8)> {
    let mut out: Vec<_> = report
        .failures
        .iter()
        .map(|f| (f.path.clone(), f.reason.code()))
        .collect();
    out.sort();
    out
}

#[test]
fn test_modify_delete_add_cycle() {
    let harness = HqTestHarness::new();
    harness.write("a", "alpha");
    harness.write("b", "bravo");
    harness.write("c", "charlie");

    let signed = harness.sign();
    assert_eq!(signed.files_total, 3);

    let clean = harness.verify();
    assert_eq!((clean.files_total, clean.files_fail, clean.files_new), (3, 0, 0));
    assert_eq!(clean.signature_valid, Some(true));
    assert_eq!(clean.tag.as_deref(), Some(harness.identity.tag().as_str()));

    harness.write("b", "bravo, rewritten");
    fs::remove_file(harness.path().join("c")).unwrap();
    harness.write("d", "delta");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: EventCallback = Arc::new(move |event: &VerifyEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    let report = harness
        .hq
        .dir_verify_with_events(harness.path(), Some(callback))
        .unwrap();

    assert_eq!(report.files_total, 3);
    assert_eq!(report.files_fail, 2);
    assert_eq!(report.files_new, 1);
    assert_eq!(report.files_ok(), 1);
    assert_eq!(reasons(&report), vec![(PathBuf::from("b"), 3), (PathBuf::from("c"), 1)]);
    assert_eq!(report.new_files, vec![PathBuf::from("d")]);
    assert_eq!(report.signature_valid, Some(true));

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    let new_files: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            VerifyEvent::NewFile(path) => Some(path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(new_files, vec![PathBuf::from("d")]);
}

#[test]
fn test_resign_picks_up_changes() {
    let harness = HqTestHarness::new();
    let total = harness.generate_project(4, 12);
    assert_eq!(harness.sign().files_total, total);

    harness.write("module2/sub0/file0.txt", "changed");
    harness.write("module9/extra.txt", "extra");
    let report = harness.verify();
    assert_eq!(report.files_fail, 1);
    assert_eq!(report.new_files, vec![PathBuf::from("module9/extra.txt")]);

    // A new generation replaces the old map and its container
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let signed = harness.sign();
    assert_eq!(signed.files_total, total + 1);
    let artifacts: Vec<_> = fs::read_dir(harness.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(".hqMAP."))
        .collect();
    assert_eq!(artifacts.len(), 2);

    let report = harness.verify();
    assert!(report.is_valid());
    assert_eq!(report.files_new, 0);
    info!("{}", report.summary());
}

#[test]
fn test_nested_map_named_file_is_verified() {
    let harness = HqTestHarness::new();
    let nested = "sub/.hqMAP.1600000000.2020-09-13T12.26.40Z.zst";
    harness.write(nested, "someone else's map");

    assert_eq!(harness.sign().files_total, 1);

    harness.write(nested, "rewritten");
    let report = harness.verify();
    assert_eq!(report.files_total, 1);
    assert_eq!(reasons(&report), vec![(PathBuf::from(nested), 3)]);
    assert!(report.new_files.is_empty());
}

#[test]
fn test_target_timestamp_selects_generation() {
    let mut harness = HqTestHarness::with_builder(|b| b.map_clean(false));
    harness.write("a", "first");
    let first = harness.sign();

    std::thread::sleep(std::time::Duration::from_millis(1100));
    harness.write("a", "second");
    let second = harness.sign();
    assert_ne!(first.map_path, second.map_path);

    // Newest map by default
    assert!(harness.verify().is_valid());

    let prefix = first.timestamp.to_string();
    harness.rebuild(|b| b.target_timestamp(prefix));
    let report = harness.verify();
    assert_eq!(report.map_path, first.map_path);
    assert_eq!(reasons(&report), vec![(PathBuf::from("a"), 3)]);
}

/// Reviewer that never produces a hash
struct BlindReviewer;

impl CodeReviewer for BlindReviewer {
    fn review(&self, _path: &Path) -> Option<String> {
        None
    }
}

#[test]
fn test_code_review_reasons() {
    let mut harness = HqTestHarness::with_builder(|b| b.code_review(true));
    harness.write("src/lib.rs", "pub fn answer() -> u32 {\n    42\n}\n");
    harness.write("src/main.rs", "fn main() {}\n");
    harness.write("src/util.rs", "pub fn id(x: u8) -> u8 { x }\n");
    harness.write("README", "plain text");
    harness.sign();

    // Whitespace only
    harness.write("src/lib.rs", "pub fn answer() -> u32 { 42 }");
    // Real code change
    harness.write("src/main.rs", "fn main() { println!(\"hi\"); }\n");
    // Not reviewed at sign time
    harness.write("README", "plain text, edited");

    let report = harness.verify();
    assert_eq!(
        reasons(&report),
        vec![
            (PathBuf::from("README"), 3),
            (PathBuf::from("src/lib.rs"), 4),
            (PathBuf::from("src/main.rs"), 5),
        ]
    );
    let lib = report
        .failures
        .iter()
        .find(|f| f.path == Path::new("src/lib.rs"))
        .unwrap();
    assert_eq!(lib.expected_code_hash, lib.calculated_code_hash);

    harness.write("src/util.rs", "pub fn id(x: u16) -> u16 { x }\n");
    harness.rebuild(|b| b.reviewer(Arc::new(BlindReviewer)));
    let report = harness.verify();
    let util = report
        .failures
        .iter()
        .find(|f| f.path == Path::new("src/util.rs"))
        .unwrap();
    assert_eq!(util.reason, FailureReason::CodeUnverifiable);
    assert!(util.calculated_code_hash.is_none());
}

#[cfg(unix)]
#[test]
fn test_broken_symlink_stays_valid() {
    let harness = HqTestHarness::new();
    harness.write("target.txt", "pointed at");
    std::os::unix::fs::symlink("missing.txt", harness.path().join("dangling")).unwrap();
    harness.sign();

    let report = harness.verify();
    assert!(report.is_valid());
    assert_eq!(report.files_total, 2);

    fs::remove_file(harness.path().join("dangling")).unwrap();
    let report = harness.verify();
    assert_eq!(reasons(&report), vec![(PathBuf::from("dangling"), 1)]);
}

#[test]
fn test_truncated_map_reports_corruption() {
    let harness = HqTestHarness::new();
    harness.write("one", "1");
    harness.write("two", "2");
    harness.write("three", "3");

    // Hand-written map whose last record loses its hash
    let mut map = Vec::new();
    for name in ["one", "three"] {
        let hash = ::hq::hasher::BlockHasher::new().hash_file(&harness.path().join(name));
        encode_record(&mut map, &IntegrityRecord::new(PathBuf::from(name), hash));
    }
    map.extend_from_slice(b"two\n0123");
    let compressed = ::hq::compression::compress(&map, 1).unwrap();
    fs::write(harness.path().join(map_file_name(1_700_000_000)), compressed).unwrap();

    let report = harness.verify();
    assert_eq!(report.files_total, 2);
    assert!(report.is_valid());
    assert_eq!(report.signature_valid, None);
    let corruption = report.corruption.unwrap();
    assert!(corruption.contains("last valid: three"), "{}", corruption);
    // The unverified file surfaces as new
    assert_eq!(report.new_files, vec![PathBuf::from("two")]);
}

#[test]
#[traced_test]
fn test_corruption_is_logged() {
    let mut map = Vec::new();
    encode_record(
        &mut map,
        &IntegrityRecord::new(PathBuf::from("kept.txt"), "a".repeat(64)),
    );
    map.extend_from_slice(b"dangling-path-without-hash");

    let mut parser = MapParser::new(&map);
    assert_eq!(parser.by_ref().count(), 1);
    assert!(parser.corruption().unwrap().is_corruption());

    assert!(logs_contain("Input map is corrupt"));
    assert!(logs_contain("last valid: kept.txt"));
}

#[test]
fn test_small_queues_do_not_stall() {
    let harness = HqTestHarness::with_builder(|b| {
        b.queues(::hq::pipeline::QueueDepths {
            feed: 2,
            output: 1,
            fail: 1,
        })
    });
    let total = harness.generate_project(5, 40);
    assert_eq!(harness.sign().files_total, total);

    // Every file fails, so the fail queue is saturated throughout
    for d in 0..5 {
        for f in 0..40 {
            harness.write(&format!("module{}/sub{}/file{}.txt", d, f % 3, f), "x");
        }
    }
    let report = harness.verify();
    assert_eq!(report.files_fail, total);
    assert!(report
        .failures
        .iter()
        .all(|f| f.reason == FailureReason::ContentMismatch));
}

#[test]
fn test_file_and_executable_signatures() {
    let harness = HqTestHarness::new();
    harness.write("release.bin", vec![9u8; 70_000]);
    harness.write("tool.py", "print('packed')\n");

    let file = harness.path().join("release.bin");
    harness.hq.file_sign(&file, &harness.identity).unwrap();
    let report = harness.hq.file_verify(&file).unwrap();
    assert!(report.signature_valid);
    assert_eq!(report.tag, harness.identity.tag().as_str());
    assert!(report.interpreter.is_none());

    let packed = harness
        .hq
        .file_sign_executable(&harness.path().join("tool.py"), &harness.identity)
        .unwrap();
    let bytes = fs::read(&packed).unwrap();
    let report = harness.hq.verify_executable(packed, &bytes[..]).unwrap();
    assert!(report.signature_valid);
    assert_eq!(report.interpreter.as_deref(), Some("PYTHON"));
    assert_eq!(report.script.as_deref(), Some(&b"print('packed')\n"[..]));

    // A flipped payload byte must withhold the script
    let mut tampered = bytes.clone();
    let last = tampered.len() - 2;
    tampered[last] ^= 0x01;
    match harness.hq.verify_executable(PathBuf::from("tampered"), &tampered[..]) {
        Ok(report) => {
            assert!(!report.signature_valid);
            assert!(report.script.is_none());
        }
        Err(e) => assert!(e.is_fatal_format() || matches!(e, HqError::Decompression(_))),
    }
}
