use proptest::prelude::*;
use shadowcfg_coe::{
    decode, encode, encode_with, CoeArtifacts, CoeError, EncodeOptions, CONFIG_SPACE_FILE_NAME,
    WRITE_MASK_FILE_NAME,
};
use shadowcfg_pci::RawConfigSpace;
use shadowcfg_writemask::WriteMask;

fn pair() -> impl Strategy<Value = (Vec<u8>, Vec<u8>)> {
    (1usize..=4096).prop_flat_map(|len| {
        (
            proptest::collection::vec(any::<u8>(), len),
            proptest::collection::vec(any::<u8>(), len),
        )
    })
}

fn data_lines(text: &str) -> usize {
    text.lines()
        .skip_while(|l| !l.starts_with("memory_initialization_vector"))
        .skip(1)
        .count()
}

proptest! {
    #[test]
    fn decode_inverts_encode((cfg, mask) in pair(), per_line in 1usize..16) {
        let raw = RawConfigSpace::new(cfg).unwrap();
        let mask = WriteMask::from_bytes(mask);
        let artifacts = encode_with(&raw, &mask, &EncodeOptions { words_per_line: per_line })
            .unwrap();

        let words = raw.len().div_ceil(4);
        prop_assert_eq!(data_lines(&artifacts.config_space), words.div_ceil(per_line));
        prop_assert_eq!(data_lines(&artifacts.write_mask), words.div_ceil(per_line));

        let (raw2, mask2) = decode(&artifacts.config_space, &artifacts.write_mask).unwrap();
        prop_assert_eq!(raw2, raw);
        prop_assert_eq!(mask2, mask);
    }
}

#[test]
fn full_config_space_has_1024_words() {
    let raw = RawConfigSpace::new(vec![0x5A; 4096]).unwrap();
    let mask = WriteMask::fixed(4096);
    let artifacts = encode(&raw, &mask).unwrap();
    assert_eq!(data_lines(&artifacts.config_space), 256);
    assert!(artifacts.config_space.trim_end().ends_with("5a5a5a5a;"));
    assert!(artifacts.write_mask.contains("; byte_length=4096"));
}

#[test]
fn mismatched_lengths_are_rejected() {
    let raw = RawConfigSpace::new(vec![0; 64]).unwrap();
    assert!(matches!(
        encode(&raw, &WriteMask::fixed(60)),
        Err(CoeError::MaskLengthMismatch { config: 64, mask: 60 })
    ));

    let a = encode(&raw, &WriteMask::fixed(64)).unwrap();
    let short = RawConfigSpace::new(vec![0; 32]).unwrap();
    let b = encode(&short, &WriteMask::fixed(32)).unwrap();
    assert!(matches!(
        decode(&a.config_space, &b.write_mask),
        Err(CoeError::WordCountMismatch { config: 16, mask: 8 })
    ));
}

#[test]
fn artifacts_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("overlay");
    let raw = RawConfigSpace::new((0..=255u8).collect::<Vec<_>>()).unwrap();
    let mut mask_bytes = vec![0u8; 256];
    mask_bytes[4] = 0x06;
    mask_bytes[5] = 0x04;
    let mask = WriteMask::from_bytes(mask_bytes);

    let artifacts = encode(&raw, &mask).unwrap();
    artifacts.write_to(&out).unwrap();
    assert!(out.join(CONFIG_SPACE_FILE_NAME).is_file());
    assert!(out.join(WRITE_MASK_FILE_NAME).is_file());

    let read = CoeArtifacts::read_from(&out).unwrap();
    assert_eq!(read, artifacts);
    assert_eq!(read.decode().unwrap(), (raw, mask));
}
