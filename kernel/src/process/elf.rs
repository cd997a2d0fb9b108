// SPDX-License-Identifier: MPL-2.0

//! Minimal ELF32 loading.
//!
//! Parsing is separated from the copy step: `parse` validates the image
//! and extracts the loadable segments, `load` copies them to their link
//! addresses and zero-fills the BSS tails. Nothing here relocates; images
//! are linked for their final addresses.

use xmas_elf::{header, program, ElfFile};

use crate::prelude::*;

/// One loadable segment of an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Offset of the segment bytes within the image.
    pub offset: usize,
    /// Link (and load) virtual address.
    pub vaddr: Vaddr,
    /// Bytes present in the image.
    pub file_size: usize,
    /// Bytes occupied in memory; the tail past `file_size` is zeroed.
    pub mem_size: usize,
    pub writable: bool,
    pub executable: bool,
}

/// The outcome of parsing an ELF32 executable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Elf32Info {
    pub entry: Vaddr,
    pub segments: Vec<Segment>,
}

/// Parses and validates an ELF32 executable image.
pub fn parse(image: &[u8]) -> Result<Elf32Info> {
    let elf = ElfFile::new(image).map_err(|msg| {
        error!("rejecting image: {}", msg);
        Error::new(Errno::EINVAL)
    })?;

    if elf.header.pt1.class() != header::Class::ThirtyTwo {
        return_errno_with_message!(Errno::EINVAL, "image is not a 32-bit executable");
    }
    if elf.header.pt1.data() != header::Data::LittleEndian {
        return_errno_with_message!(Errno::EINVAL, "image is not little-endian");
    }
    match elf.header.pt2.type_().as_type() {
        header::Type::Executable => (),
        _ => {
            return_errno_with_message!(Errno::EINVAL, "image is not an executable");
        }
    }

    let mut segments = Vec::new();
    for ph in elf.program_iter() {
        if ph.get_type() != Ok(program::Type::Load) {
            continue;
        }

        let offset = ph.offset() as usize;
        let file_size = ph.file_size() as usize;
        if offset.checked_add(file_size).map_or(true, |end| end > image.len()) {
            return_errno_with_message!(Errno::EINVAL, "segment exceeds the image");
        }
        if (ph.mem_size() as usize) < file_size {
            return_errno_with_message!(Errno::EINVAL, "segment memory is smaller than its file");
        }

        segments.push(Segment {
            offset,
            vaddr: ph.virtual_addr() as Vaddr,
            file_size,
            mem_size: ph.mem_size() as usize,
            writable: ph.flags().is_write(),
            executable: ph.flags().is_execute(),
        });
    }

    if segments.is_empty() {
        return_errno_with_message!(Errno::EINVAL, "image has no loadable segment");
    }

    Ok(Elf32Info {
        entry: elf.header.pt2.entry_point() as Vaddr,
        segments,
    })
}

/// Loads an ELF32 executable to its link addresses, returning the entry
/// point.
///
/// The caller must have the target address space active and its pages
/// attached; only the bare-metal build actually touches the destination.
pub fn load(image: &[u8]) -> Result<Vaddr> {
    let info = parse(image)?;

    for segment in &info.segments {
        #[cfg(target_os = "none")]
        // SAFETY: the caller activated an address space whose user range
        // backs the segment addresses.
        unsafe {
            let dst = segment.vaddr as *mut u8;
            core::ptr::copy_nonoverlapping(
                image.as_ptr().add(segment.offset),
                dst,
                segment.file_size,
            );
            core::ptr::write_bytes(
                dst.add(segment.file_size),
                0,
                segment.mem_size - segment.file_size,
            );
        }
        #[cfg(not(target_os = "none"))]
        let _ = segment;
    }

    Ok(info.entry)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use vesper_hal::config::USER_BASE_VIRT;

    /// Builds a minimal valid ELF32 little-endian executable with one
    /// loadable segment at `USER_BASE_VIRT`.
    pub(crate) fn sample_image() -> Vec<u8> {
        let mut image = alloc::vec![0u8; 0x100];

        // ELF identification.
        image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        image[4] = 1; // 32-bit
        image[5] = 1; // little-endian
        image[6] = 1; // version

        let set16 = |image: &mut Vec<u8>, at: usize, v: u16| {
            image[at..at + 2].copy_from_slice(&v.to_le_bytes())
        };
        let set32 = |image: &mut Vec<u8>, at: usize, v: u32| {
            image[at..at + 4].copy_from_slice(&v.to_le_bytes())
        };

        set16(&mut image, 16, 2); // e_type = EXEC
        set16(&mut image, 18, 3); // e_machine = 386
        set32(&mut image, 20, 1); // e_version
        set32(&mut image, 24, USER_BASE_VIRT as u32); // e_entry
        set32(&mut image, 28, 0x34); // e_phoff
        set16(&mut image, 40, 52); // e_ehsize
        set16(&mut image, 42, 32); // e_phentsize
        set16(&mut image, 44, 1); // e_phnum

        // Program header at 0x34: PT_LOAD, offset 0x80, filesz 0x20,
        // memsz 0x40, flags RWX.
        let ph = 0x34;
        set32(&mut image, ph, 1); // p_type = LOAD
        set32(&mut image, ph + 4, 0x80); // p_offset
        set32(&mut image, ph + 8, USER_BASE_VIRT as u32); // p_vaddr
        set32(&mut image, ph + 12, USER_BASE_VIRT as u32); // p_paddr
        set32(&mut image, ph + 16, 0x20); // p_filesz
        set32(&mut image, ph + 20, 0x40); // p_memsz
        set32(&mut image, ph + 24, 0x7); // p_flags = RWX
        set32(&mut image, ph + 28, 0x1000); // p_align

        image
    }

    #[test]
    fn parses_a_valid_image() {
        let image = sample_image();
        let info = parse(&image).unwrap();

        assert_eq!(info.entry, USER_BASE_VIRT);
        assert_eq!(info.segments.len(), 1);
        let seg = &info.segments[0];
        assert_eq!(seg.vaddr, USER_BASE_VIRT);
        assert_eq!(seg.file_size, 0x20);
        assert_eq!(seg.mem_size, 0x40);
        assert!(seg.writable);
        assert!(seg.executable);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = sample_image();
        image[0] = 0;
        assert!(parse(&image).is_err());
    }

    #[test]
    fn rejects_wrong_class() {
        let mut image = sample_image();
        image[4] = 2; // 64-bit
        assert!(parse(&image).is_err());
    }

    #[test]
    fn rejects_truncated_segment() {
        let mut image = sample_image();
        // Claim more file bytes than the image holds.
        image[0x34 + 16..0x34 + 20].copy_from_slice(&0x10_0000u32.to_le_bytes());
        assert!(parse(&image).is_err());
    }

    #[test]
    fn rejects_shrunken_memory_size() {
        let mut image = sample_image();
        // memsz < filesz.
        image[0x34 + 20..0x34 + 24].copy_from_slice(&0x10u32.to_le_bytes());
        assert!(parse(&image).is_err());
    }
}
