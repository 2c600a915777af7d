use proptest::prelude::*;
use shadowcfg_pci::header::{
    PCI_BAR0_OFFSET, PCI_BASE_CLASS_OFFSET, PCI_CAP_PTR_OFFSET, PCI_HEADER_TYPE_OFFSET,
    PCI_PROG_IF_OFFSET, PCI_REVISION_ID_OFFSET, PCI_SUBCLASS_OFFSET,
};
use shadowcfg_pci::{ConfigSpaceError, ConfigSpaceHeader, ConfigSpaceModel, RawConfigSpace};

fn le16(bytes: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

fn le32(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap())
}

#[test]
fn intel_audio_identity_is_decoded_exactly() {
    let mut bytes = vec![0u8; 256];
    bytes[0x00..0x02].copy_from_slice(&0x8086u16.to_le_bytes());
    bytes[0x02..0x04].copy_from_slice(&0x0A0Cu16.to_le_bytes());
    bytes[PCI_REVISION_ID_OFFSET] = 0x01;
    bytes[PCI_PROG_IF_OFFSET] = 0x00;
    bytes[PCI_SUBCLASS_OFFSET] = 0x03;
    bytes[PCI_BASE_CLASS_OFFSET] = 0x04;

    let header = ConfigSpaceHeader::parse(&RawConfigSpace::new(bytes).unwrap()).unwrap();
    assert_eq!(header.vendor_id(), 0x8086);
    assert_eq!(header.device_id(), 0x0A0C);
    assert_eq!(header.class_code(), 0x040300);
    assert_eq!(header.revision_id(), 0x01);
}

#[test]
fn thirty_two_byte_capture_is_too_short() {
    let raw = RawConfigSpace::new(vec![0u8; 32]).unwrap();
    assert_eq!(
        ConfigSpaceHeader::parse(&raw).unwrap_err(),
        ConfigSpaceError::BufferTooShort { len: 32, min: 64 }
    );
    assert!(matches!(
        ConfigSpaceModel::parse(raw),
        Err(ConfigSpaceError::BufferTooShort { len: 32, .. })
    ));
}

#[test]
fn sixty_four_bytes_is_enough_for_the_header() {
    let raw = RawConfigSpace::new(vec![0u8; 64]).unwrap();
    let model = ConfigSpaceModel::parse(raw).unwrap();
    assert!(model.capabilities().is_empty());
    assert!(model.require_complete_chain().is_ok());
}

fn endpoint_capture() -> impl Strategy<Value = Vec<u8>> {
    (proptest::collection::vec(any::<u8>(), 64..=256), any::<bool>()).prop_map(
        |(mut bytes, multi_function)| {
            bytes[PCI_HEADER_TYPE_OFFSET] = if multi_function { 0x80 } else { 0x00 };
            bytes
        },
    )
}

proptest! {
    #[test]
    fn header_fields_reproduce_their_bytes(bytes in endpoint_capture()) {
        let raw = RawConfigSpace::new(bytes.clone()).unwrap();
        let header = ConfigSpaceHeader::parse(&raw).unwrap();

        prop_assert_eq!(header.vendor_id(), le16(&bytes, 0x00));
        prop_assert_eq!(header.device_id(), le16(&bytes, 0x02));
        prop_assert_eq!(header.command().bits(), le16(&bytes, 0x04));
        prop_assert_eq!(header.status().bits(), le16(&bytes, 0x06));
        prop_assert_eq!(header.revision_id(), bytes[0x08]);
        prop_assert_eq!(header.prog_if(), bytes[0x09]);
        prop_assert_eq!(header.subclass(), bytes[0x0A]);
        prop_assert_eq!(header.base_class(), bytes[0x0B]);
        prop_assert_eq!(header.header_type(), bytes[PCI_HEADER_TYPE_OFFSET]);
        for (i, bar) in header.bars().iter().enumerate() {
            prop_assert_eq!(*bar, le32(&bytes, PCI_BAR0_OFFSET + i * 4));
        }
        prop_assert_eq!(header.subsystem_vendor_id(), le16(&bytes, 0x2C));
        prop_assert_eq!(header.subsystem_device_id(), le16(&bytes, 0x2E));
        prop_assert_eq!(header.capabilities_pointer(), bytes[PCI_CAP_PTR_OFFSET]);
        prop_assert_eq!(header.interrupt_pin(), bytes[0x3D]);
    }
}
