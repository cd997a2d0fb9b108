// SPDX-License-Identifier: MPL-2.0

//! The ACPI Multiple APIC Description Table.
//!
//! The walk records at most one IO APIC, counts the local APICs, and skips
//! entry types it does not know. A second IO APIC descriptor is a platform
//! this kernel does not support.

use log::{info, warn};

use crate::{
    prelude::*,
    sync::Once,
    Error,
};

/// Length of the MADT header: the SDT header (36 bytes) plus the local
/// interrupt controller address and flags.
const MADT_HEADER_LEN: usize = 44;

/// Entry type codes.
const ENTRY_LOCAL_APIC: u8 = 0;
const ENTRY_IO_APIC: u8 = 1;
const ENTRY_SOURCE_OVERRIDE: u8 = 2;
const ENTRY_IO_APIC_NMI: u8 = 3;
const ENTRY_LOCAL_APIC_NMI: u8 = 4;
const ENTRY_LOCAL_APIC_ADDR_OVERRIDE: u8 = 5;
const ENTRY_LOCAL_X2APIC: u8 = 9;

/// Description of the IO APIC the table reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoApicInfo {
    pub id: u8,
    pub addr: u32,
    pub gsi: u32,
}

/// Description of one local APIC (one core).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalApicInfo {
    pub processor_id: u32,
    pub apic_id: u32,
    pub flags: u32,
}

/// Everything the boot sequence needs out of the MADT.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MadtInfo {
    pub ioapic: Option<IoApicInfo>,
    pub lapics: Vec<LocalApicInfo>,
}

static MADT_INFO: Once<MadtInfo> = Once::new();

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Walks a raw MADT, returning the recorded platform information.
///
/// `table` must start at the table signature. Unknown entry types are
/// skipped; multiple IO APICs panic.
pub fn parse(table: &[u8]) -> Result<MadtInfo> {
    if table.len() < MADT_HEADER_LEN || &table[0..4] != b"APIC" {
        return Err(Error::InvalidArgs);
    }

    let length = read_u32(table, 4) as usize;
    if length < MADT_HEADER_LEN || length > table.len() {
        return Err(Error::InvalidArgs);
    }

    let mut info = MadtInfo::default();
    let mut offset = MADT_HEADER_LEN;

    while offset + 2 <= length {
        let typ = table[offset];
        let len = table[offset + 1] as usize;
        if len < 2 || offset + len > length {
            return Err(Error::InvalidArgs);
        }
        let entry = &table[offset..offset + len];

        match typ {
            ENTRY_LOCAL_APIC if len >= 8 => {
                let lapic = LocalApicInfo {
                    processor_id: entry[2] as u32,
                    apic_id: entry[3] as u32,
                    flags: read_u32(entry, 4),
                };
                info!(
                    "found lapic (processor={}, apic={}, flags={:#x})",
                    lapic.processor_id, lapic.apic_id, lapic.flags
                );
                info.lapics.push(lapic);
            }
            ENTRY_IO_APIC if len >= 12 => {
                let ioapic = IoApicInfo {
                    id: entry[2],
                    addr: read_u32(entry, 4),
                    gsi: read_u32(entry, 8),
                };
                info!(
                    "found ioapic (id={}, addr={:#x}, gsi={})",
                    ioapic.id, ioapic.addr, ioapic.gsi
                );
                if info.ioapic.is_some() {
                    panic!("multiple ioapics are not supported");
                }
                info.ioapic = Some(ioapic);
            }
            ENTRY_SOURCE_OVERRIDE if len >= 10 => {
                info!(
                    "interrupt source override (bus={}, irq={}, gsi={})",
                    entry[2],
                    entry[3],
                    read_u32(entry, 4)
                );
            }
            ENTRY_IO_APIC_NMI if len >= 10 => {
                info!(
                    "ioapic nmi (id={}, gsi={})",
                    entry[2],
                    read_u32(entry, 6)
                );
            }
            ENTRY_LOCAL_APIC_NMI if len >= 6 => {
                info!(
                    "lapic nmi (processor={:#x}, lint={})",
                    entry[2], entry[5]
                );
            }
            ENTRY_LOCAL_APIC_ADDR_OVERRIDE if len >= 12 => {
                info!("lapic address override");
            }
            ENTRY_LOCAL_X2APIC if len >= 16 => {
                let lapic = LocalApicInfo {
                    processor_id: read_u32(entry, 8),
                    apic_id: read_u32(entry, 12),
                    flags: 0,
                };
                info!(
                    "found x2apic (processor={}, apic={})",
                    lapic.processor_id, lapic.apic_id
                );
                info.lapics.push(lapic);
            }
            _ => {
                warn!("skipping madt entry (type={}, len={})", typ, len);
            }
        }

        offset += len;
    }

    Ok(info)
}

/// Parses the boot MADT and publishes the result for the rest of the boot
/// sequence.
pub fn commit(table: &[u8]) -> Result<&'static MadtInfo> {
    let info = parse(table)?;
    Ok(MADT_INFO.call_once(|| info))
}

/// Returns the published MADT information, if a table was committed.
pub fn info() -> Option<&'static MadtInfo> {
    MADT_INFO.get()
}

#[cfg(test)]
mod test {
    use super::*;

    struct TableBuilder {
        bytes: Vec<u8>,
    }

    impl TableBuilder {
        fn new() -> Self {
            let mut bytes = alloc::vec![0u8; MADT_HEADER_LEN];
            bytes[0..4].copy_from_slice(b"APIC");
            Self { bytes }
        }

        fn lapic(mut self, processor: u8, apic: u8) -> Self {
            self.bytes
                .extend_from_slice(&[ENTRY_LOCAL_APIC, 8, processor, apic, 1, 0, 0, 0]);
            self
        }

        fn ioapic(mut self, id: u8, addr: u32, gsi: u32) -> Self {
            self.bytes.extend_from_slice(&[ENTRY_IO_APIC, 12, id, 0]);
            self.bytes.extend_from_slice(&addr.to_le_bytes());
            self.bytes.extend_from_slice(&gsi.to_le_bytes());
            self
        }

        fn unknown(mut self, typ: u8, len: u8) -> Self {
            let mut entry = alloc::vec![0u8; len as usize];
            entry[0] = typ;
            entry[1] = len;
            self.bytes.extend_from_slice(&entry);
            self
        }

        fn build(mut self) -> Vec<u8> {
            let length = self.bytes.len() as u32;
            self.bytes[4..8].copy_from_slice(&length.to_le_bytes());
            self.bytes
        }
    }

    #[test]
    fn rejects_bad_signature() {
        let mut table = TableBuilder::new().build();
        table[0] = b'X';
        assert_eq!(parse(&table), Err(Error::InvalidArgs));
    }

    #[test]
    fn records_cores_and_ioapic() {
        let table = TableBuilder::new()
            .lapic(0, 0)
            .lapic(1, 1)
            .ioapic(2, 0xfec0_0000, 0)
            .build();
        let info = parse(&table).unwrap();
        assert_eq!(info.lapics.len(), 2);
        assert_eq!(
            info.ioapic,
            Some(IoApicInfo {
                id: 2,
                addr: 0xfec0_0000,
                gsi: 0
            })
        );
    }

    #[test]
    fn skips_unknown_entries() {
        let table = TableBuilder::new()
            .unknown(0x7f, 6)
            .lapic(0, 0)
            .build();
        let info = parse(&table).unwrap();
        assert_eq!(info.lapics.len(), 1);
    }

    #[test]
    #[should_panic(expected = "multiple ioapics")]
    fn panics_on_second_ioapic() {
        let table = TableBuilder::new()
            .ioapic(1, 0xfec0_0000, 0)
            .ioapic(2, 0xfec0_1000, 24)
            .build();
        let _ = parse(&table);
    }

    #[test]
    fn rejects_truncated_entry() {
        let mut table = TableBuilder::new().lapic(0, 0).build();
        // Claim a longer table than the buffer actually holds.
        let bad_len = (table.len() + 8) as u32;
        table[4..8].copy_from_slice(&bad_len.to_le_bytes());
        assert_eq!(parse(&table), Err(Error::InvalidArgs));
    }
}
