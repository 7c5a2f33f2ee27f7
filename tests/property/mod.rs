//! Property-based testing for hq
//!
//! Uses proptest to check invariants of the map codec, the container codec
//! and identity derivation across randomly generated inputs.

use ::hq::container::Container;
use ::hq::crypto::ED25519_SIGNATURE_LEN;
use ::hq::map::{encode_record, MapParser};
use ::hq::*;
use proptest::prelude::*;
use std::path::PathBuf;

/// Generate relative paths without linefeeds
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let component = prop_oneof![
        "[a-z]{1,10}".prop_map(|s| s),
        "dir[0-9]{1,3}".prop_map(|s| s),
        "[a-z ._-]{1,8}[a-z]".prop_map(|s| s),
    ];
    prop::collection::vec(component, 1..=4).prop_map(|parts| parts.iter().collect())
}

fn hash_strategy() -> impl Strategy<Value = String> {
    "[0-9a-f]{64}"
}

fn record_strategy() -> impl Strategy<Value = IntegrityRecord> {
    (path_strategy(), hash_strategy(), prop::option::of(hash_strategy())).prop_map(
        |(path, hash, code)| {
            let record = IntegrityRecord::new(path, hash);
            match code {
                Some(code) => record.with_code_hash(code),
                None => record,
            }
        },
    )
}

fn encode_all(records: &[IntegrityRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    for record in records {
        encode_record(&mut buf, record);
    }
    buf
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Parsing an encoded map yields the records back, and re-encoding the
    /// parse is byte-identical
    #[test]
    fn prop_map_codec_is_stable(records in prop::collection::vec(record_strategy(), 0..40)) {
        let buf = encode_all(&records);
        let mut parser = MapParser::new(&buf);
        let parsed: Vec<_> = parser.by_ref().collect();

        prop_assert!(parser.corruption().is_none());
        prop_assert_eq!(parser.records(), records.len() as u64);
        prop_assert_eq!(&parsed, &records);
        prop_assert_eq!(encode_all(&parsed), buf);
    }

    /// A truncated map yields exactly the records whose hash line is complete
    #[test]
    fn prop_truncation_keeps_complete_prefix(
        records in prop::collection::vec(
            (path_strategy(), hash_strategy()).prop_map(|(p, h)| IntegrityRecord::new(p, h)),
            1..20,
        ),
        cut_seed in any::<prop::sample::Index>(),
    ) {
        // End of the hash line and end of the whole frame for each record
        let mut boundaries = Vec::new();
        let mut buf = Vec::new();
        for record in &records {
            encode_record(&mut buf, record);
            boundaries.push((buf.len() - 1, buf.len()));
        }
        let cut = cut_seed.index(buf.len() + 1);

        let mut parser = MapParser::new(&buf[..cut]);
        let parsed: Vec<_> = parser.by_ref().collect();

        let complete = boundaries.iter().filter(|(hash_end, _)| *hash_end <= cut).count();
        prop_assert_eq!(parsed.len(), complete);
        prop_assert_eq!(&parsed[..], &records[..complete]);

        let clean_cut = cut == 0
            || boundaries.iter().any(|&(hash_end, frame_end)| cut == hash_end || cut == frame_end);
        prop_assert_eq!(parser.corruption().is_none(), clean_cut);
    }

    /// Tags depend only on owner and key, and always have the fixed shape
    #[test]
    fn prop_tag_is_pure(
        owner in "[a-z0-9@.]{6,64}",
        key in prop::collection::vec(any::<u8>(), 32),
    ) {
        let owner = Owner::new(&owner).unwrap();
        let first = Tag::derive(&owner, &key);
        let second = Tag::derive(&owner, &key);
        prop_assert_eq!(&first, &second);

        let text = first.as_str();
        prop_assert_eq!(text.len(), 30);
        for (i, c) in text.chars().enumerate() {
            if matches!(i, 6 | 9 | 16 | 19) {
                prop_assert_eq!(c, '-');
            } else {
                prop_assert!(c.is_ascii_uppercase() || ('2'..='7').contains(&c));
            }
        }
        prop_assert_eq!(Tag::parse(text).unwrap(), first);
    }

    /// Containers decode to the fields they were encoded from
    #[test]
    fn prop_container_fields_survive(
        owner in "[a-z]{6,20}",
        ts in 0i64..=9_999_999_999,
        signature in prop::collection::vec(any::<u8>(), ED25519_SIGNATURE_LEN),
        payload in prop::collection::vec(any::<u8>(), 0..256),
        executable in any::<bool>(),
    ) {
        let owner = Owner::new(&owner).unwrap();
        let tag = Tag::derive(&owner, &[1u8; 32]);
        let container = if executable {
            Container::executable(Interpreter::Posix, tag.clone(), ts, signature.clone(), payload.clone())
        } else {
            Container::signature(tag.clone(), ts, signature.clone())
        };

        let bytes = container.encode().unwrap();
        prop_assert_eq!(&bytes[..15], b"#!/usr/bin/hq\n#");
        prop_assert_eq!(*bytes.last().unwrap(), b'#');

        let decoded = Container::decode(&bytes, ED25519_SIGNATURE_LEN).unwrap();
        prop_assert_eq!(decoded.tag(), &tag);
        prop_assert_eq!(decoded.timestamp(), ts);
        prop_assert_eq!(decoded.signature_bytes(), &signature[..]);
        if executable {
            prop_assert_eq!(decoded.kind(), ContainerKind::Executable(Interpreter::Posix));
            prop_assert_eq!(decoded.payload(), &payload[..]);
        } else {
            prop_assert_eq!(decoded.kind(), ContainerKind::Signature);
            prop_assert!(decoded.payload().is_empty());
        }
    }
}
