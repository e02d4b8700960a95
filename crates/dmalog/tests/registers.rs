mod common;

use common::{device, status, write_descriptor, RecordingMsi, TestIrq};
use dmalog::{
    DmalogBuilder, DmalogConfig, DmalogStats, Interrupt, MsiMessage, PendingFlags, MMIO_REGION_SIZE,
    PCI_DEVICE_ID, PCI_REVISION, PCI_VENDOR_ID,
};
use dmalog_backend::LoopbackBackend;
use memory::{DenseMemory, GuestMemory, MmioHandler};

const OUT_DESC: u64 = 0x1000;
const IN_DESC: u64 = 0x2000;

fn complete_both_directions(
    dev: &mut dmalog::DmalogDevice<DenseMemory, LoopbackBackend>,
) {
    let mem = dev.memory_mut();
    write_descriptor(mem, OUT_DESC, true, &[]);
    write_descriptor(mem, IN_DESC, true, &[(0x8000, 2)]);
    dev.mmio_write(0x00, 8, OUT_DESC);
    dev.mmio_write(0x08, 8, IN_DESC);
    dev.deliver(b"ok").unwrap();
}

#[test]
fn acknowledge_both_bits_clears_only_outbound() {
    let (mut dev, irq) = device();
    complete_both_directions(&mut dev);
    assert_eq!(
        dev.pending(),
        PendingFlags {
            outbound: true,
            inbound: true
        }
    );

    dev.mmio_write(0x10, 8, 0b11);
    assert_eq!(
        dev.pending(),
        PendingFlags {
            outbound: false,
            inbound: true
        }
    );
    // The inbound direction still holds the shared line.
    assert!(irq.level());

    dev.mmio_write(0x10, 8, 0b10);
    assert_eq!(dev.pending(), PendingFlags::default());
    assert!(!irq.level());
}

#[test]
fn acknowledge_is_idempotent() {
    let (mut dev, irq) = device();
    complete_both_directions(&mut dev);
    dev.mmio_write(0x10, 8, 0b01);
    let after_first = (dev.pending(), irq.level(), irq.raises());

    dev.mmio_write(0x10, 8, 0b01);
    assert_eq!((dev.pending(), irq.level(), irq.raises()), after_first);
}

#[test]
fn acknowledge_uses_only_the_access_width() {
    let (mut dev, _irq) = device();
    complete_both_directions(&mut dev);

    // A byte write of 0x100 carries no acknowledge bits.
    dev.mmio_write(0x10, 1, 0x100);
    assert!(dev.pending().outbound);
}

#[test]
fn tag_is_readable_byte_by_byte() {
    let config = DmalogConfig {
        tag: "serial0".to_string(),
    };
    let mut dev = DmalogBuilder::new(config)
        .memory(DenseMemory::new(0x1000).unwrap())
        .backend(LoopbackBackend::new())
        .interrupt(Interrupt::level(TestIrq::default()))
        .build()
        .unwrap();

    let tag: Vec<u8> = (0..8u64).map(|i| MmioHandler::read(&mut dev, 0x10 + i, 1) as u8).collect();
    assert_eq!(tag, b"serial0\0");
    // Wider accesses still return a single byte.
    assert_eq!(MmioHandler::read(&mut dev, 0x10, 8), u64::from(b's'));
    // Command registers read as zero.
    assert_eq!(MmioHandler::read(&mut dev, 0x00, 8), 0);
    assert_eq!(MmioHandler::read(&mut dev, 0x08, 8), 0);
    assert_eq!(MmioHandler::read(&mut dev, 0x50, 1), 0);
    assert_eq!(MmioHandler::read(&mut dev, MMIO_REGION_SIZE - 1, 1), 0);
}

#[test]
fn writes_to_unmapped_offsets_are_ignored() {
    let (mut dev, irq) = device();
    write_descriptor(dev.memory_mut(), OUT_DESC, true, &[]);

    for offset in [0x04, 0x0c, 0x18, 0x20, 0x4f, 0x1000] {
        dev.mmio_write(offset, 8, OUT_DESC);
    }
    assert_eq!(status(dev.memory(), OUT_DESC), 0);
    assert!(!irq.level());
    assert_eq!(dev.stats(), DmalogStats::default());
}

#[test]
fn narrow_submit_write_uses_low_bytes_only() {
    let (mut dev, _irq) = device();
    write_descriptor(dev.memory_mut(), OUT_DESC, false, &[]);

    dev.mmio_write(0x00, 4, 0xffff_ffff_0000_0000 | OUT_DESC);
    assert_eq!(status(dev.memory(), OUT_DESC), 1);
}

#[test]
fn message_mode_sends_one_message_per_unacknowledged_direction() {
    let msi = RecordingMsi::default();
    let message = MsiMessage {
        address: 0xFEE0_0000,
        data: 0x0031,
    };
    let (mut dev, irq) = device();
    dev.set_interrupt(Interrupt::message(msi.clone(), message));

    complete_both_directions(&mut dev);
    write_descriptor(dev.memory_mut(), OUT_DESC, true, &[]);
    dev.mmio_write(0x00, 8, OUT_DESC);

    assert_eq!(msi.count(), 2);
    assert!(!irq.level());
    assert!(!dev.irq_level());
    assert_eq!(msi.0.lock().unwrap()[0], message);

    dev.acknowledge(0b01);
    dev.mmio_write(0x00, 8, OUT_DESC);
    assert_eq!(msi.count(), 3);
}

#[test]
fn switching_to_message_mode_releases_the_level_line() {
    let (mut dev, irq) = device();
    complete_both_directions(&mut dev);
    assert!(irq.level());

    dev.set_interrupt(Interrupt::message(RecordingMsi::default(), MsiMessage::default()));
    assert!(!irq.level());
    assert!(dev.pending().outbound && dev.pending().inbound);
}

#[test]
fn header_is_written_before_interrupt_is_observed() {
    use std::sync::{Arc, Mutex};

    struct SnoopingLine {
        mem: Arc<Mutex<DenseMemory>>,
        seen: Arc<Mutex<Vec<u32>>>,
    }

    impl dmalog::IrqLine for SnoopingLine {
        fn set_level(&self, high: bool) {
            if high {
                let status = self.mem.lock().unwrap().read_u32_le(OUT_DESC + 4).unwrap();
                self.seen.lock().unwrap().push(status);
            }
        }
    }

    let mem = Arc::new(Mutex::new(DenseMemory::new(0x4000).unwrap()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    write_descriptor(&mut mem.clone(), OUT_DESC, true, &[]);

    let mut dev = DmalogBuilder::new(DmalogConfig::default())
        .memory(mem.clone())
        .backend(LoopbackBackend::new())
        .interrupt(Interrupt::level(SnoopingLine {
            mem: mem.clone(),
            seen: seen.clone(),
        }))
        .build()
        .unwrap();

    dev.mmio_write(0x00, 8, OUT_DESC);
    assert_eq!(seen.lock().unwrap().as_slice(), &[1]);
}

#[test]
fn identity_constants() {
    assert_eq!(PCI_VENDOR_ID, 0x1234);
    assert_eq!(PCI_DEVICE_ID, 0x69e8);
    assert_eq!(PCI_REVISION, 0x12);
    assert_eq!(MMIO_REGION_SIZE, 1 << 20);
}
