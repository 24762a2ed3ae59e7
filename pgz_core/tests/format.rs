/// Member header layout, length stamping, and the serde-backed
/// configuration surface.
use pgz_codecs::GzipCodec;
use pgz_core::codec::Codec;
use pgz_core::config::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SCAN_WINDOW};
use pgz_core::format::{
    find_member_magic, length_subfield, MemberHeader, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE,
    MAX_MEMBER_LEN, MEMBER_HEADER_SIZE, MIN_MEMBER_LEN,
};
use pgz_core::{ArchiverConfig, Framing};

// ── helpers ────────────────────────────────────────────────────────────────

fn stamped_member(raw: &[u8]) -> Vec<u8> {
    let mut member = GzipCodec::default()
        .compress_block(raw, &length_subfield())
        .unwrap();
    MemberHeader::stamp(&mut member).unwrap();
    member
}

fn header_of(member: &[u8]) -> [u8; MEMBER_HEADER_SIZE] {
    member[..MEMBER_HEADER_SIZE].try_into().unwrap()
}

// ── member header ──────────────────────────────────────────────────────────

#[test]
fn test_length_subfield_layout() {
    assert_eq!(length_subfield(), [b'P', b'G', 4, 0, 0, 0, 0, 0]);
}

#[test]
fn test_stamp_records_member_length() {
    let member = stamped_member(b"hello, member");

    assert_eq!(&member[..3], &[0x1f, 0x8b, 0x08]);
    assert_ne!(member[3] & 0x04, 0, "FEXTRA must be set");
    assert_eq!(&member[10..12], &8u16.to_le_bytes());
    assert_eq!(&member[12..14], b"PG");

    let header = MemberHeader::from_bytes(&header_of(&member)).unwrap();
    assert_eq!(header.member_len as usize, member.len());
    assert_eq!(&member[16..20], &(member.len() as u32).to_le_bytes());
}

#[test]
fn test_stamped_member_still_decodes() {
    let raw = b"stamping the length must not disturb the payload".repeat(20);
    let member = stamped_member(&raw);
    assert_eq!(GzipCodec::default().decompress_block(&member).unwrap(), raw);
}

#[test]
fn test_from_bytes_rejects_bad_signature() {
    let mut header = header_of(&stamped_member(b"x"));
    header[1] = 0x8c;
    let err = MemberHeader::from_bytes(&header).unwrap_err();
    assert!(err.0.contains("signature"), "{err}");
}

#[test]
fn test_from_bytes_rejects_missing_extra_field() {
    let mut header = header_of(&stamped_member(b"x"));
    header[3] &= !0x04;
    let err = MemberHeader::from_bytes(&header).unwrap_err();
    assert!(err.0.contains("no extra field"), "{err}");
}

#[test]
fn test_from_bytes_rejects_foreign_subfield() {
    let mut header = header_of(&stamped_member(b"x"));
    header[12..14].copy_from_slice(b"AP");
    assert!(MemberHeader::from_bytes(&header).is_err());
}

#[test]
fn test_from_bytes_rejects_implausible_lengths() {
    let mut header = header_of(&stamped_member(b"x"));

    header[16..20].copy_from_slice(&((MIN_MEMBER_LEN - 1) as u32).to_le_bytes());
    assert!(MemberHeader::from_bytes(&header).is_err());

    header[16..20].copy_from_slice(&((MAX_MEMBER_LEN + 1) as u32).to_le_bytes());
    assert!(MemberHeader::from_bytes(&header).is_err());

    header[16..20].copy_from_slice(&(MIN_MEMBER_LEN as u32).to_le_bytes());
    assert_eq!(
        MemberHeader::from_bytes(&header).unwrap().member_len as usize,
        MIN_MEMBER_LEN
    );
}

#[test]
fn test_stamp_rejects_member_without_subfield() {
    let mut plain = GzipCodec::default().compress_block(b"no extra", &[]).unwrap();
    assert!(MemberHeader::stamp(&mut plain).is_err());

    let mut tiny = vec![0x1f, 0x8b, 0x08, 0x04];
    assert!(MemberHeader::stamp(&mut tiny).is_err());
}

#[test]
fn test_find_member_magic() {
    let hay = [0x00, 0x1f, 0x8b, 0x08, 0x00, 0x1f, 0x8b, 0x1f, 0x8b, 0x08];
    assert_eq!(find_member_magic(&hay, 0), Some(1));
    assert_eq!(find_member_magic(&hay, 2), Some(7));
    assert_eq!(find_member_magic(&hay, 8), None);
    assert_eq!(find_member_magic(&hay, 100), None);
    assert_eq!(find_member_magic(&[], 0), None);
}

// ── configuration ──────────────────────────────────────────────────────────

#[test]
fn test_config_defaults() {
    let config = ArchiverConfig::default();
    assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
    assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    assert_eq!(config.scan_window, DEFAULT_SCAN_WINDOW);
    assert_eq!(config.framing, Framing::LengthPrefixed);
    assert!(config.workers >= 1);
    config.validate().unwrap();
}

#[test]
fn test_partial_json_config_keeps_defaults() {
    let config: ArchiverConfig =
        serde_json::from_str(r#"{ "block_size": 1048576, "framing": "magic-scan" }"#).unwrap();
    assert_eq!(config.block_size, 1 << 20);
    assert_eq!(config.framing, Framing::MagicScan);
    assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    config.validate().unwrap();
}

#[test]
fn test_json_config_round_trips() {
    let config = ArchiverConfig {
        block_size: 4096,
        workers: 3,
        queue_capacity: 9,
        framing: Framing::MagicScan,
        scan_window: 512,
        poll_interval_ms: 25,
    };
    let text = serde_json::to_string(&config).unwrap();
    assert!(text.contains(r#""framing":"magic-scan""#), "{text}");
    let back: ArchiverConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_validate_rejects_out_of_range_values() {
    let base = ArchiverConfig::default();
    let bad = [
        ArchiverConfig { block_size: 0, ..base.clone() },
        ArchiverConfig { block_size: MAX_BLOCK_SIZE + 1, ..base.clone() },
        ArchiverConfig { workers: 0, ..base.clone() },
        ArchiverConfig { queue_capacity: 1, ..base.clone() },
        ArchiverConfig { scan_window: 2, ..base.clone() },
        ArchiverConfig { poll_interval_ms: 0, ..base.clone() },
    ];
    for config in bad {
        assert!(config.validate().is_err(), "{config:?} should be rejected");
    }
}

#[test]
fn test_framing_parses_cli_names() {
    assert_eq!("length".parse::<Framing>().unwrap(), Framing::LengthPrefixed);
    assert_eq!("length-prefixed".parse::<Framing>().unwrap(), Framing::LengthPrefixed);
    assert_eq!("scan".parse::<Framing>().unwrap(), Framing::MagicScan);
    assert_eq!("magic-scan".parse::<Framing>().unwrap(), Framing::MagicScan);
    assert!("zip".parse::<Framing>().is_err());
    assert_eq!(Framing::MagicScan.to_string(), "magic-scan");
}
