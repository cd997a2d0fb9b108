// SPDX-License-Identifier: MPL-2.0

//! The page-frame allocator.
//!
//! One bit per physical frame, first-fit. The ranges hosting the kernel
//! image and the kernel page pool are booked at init and never freed; the
//! boot memory map contributes the reserved and malfunctioning ranges.

use log::{error, info};

use crate::{
    config::{
        KERNEL_BASE_PHYS, KERNEL_END_PHYS, KPOOL_BASE_PHYS, KPOOL_END_PHYS, NUM_FRAMES,
        NUM_UFRAMES, PAGE_SHIFT, PAGE_SIZE,
    },
    mm::{mmap, Paddr},
    sync::SpinLock,
    Error, Result,
};

/// The number of a physical page frame.
pub type FrameNumber = u32;

/// Sentinel returned when no frame can be handed out.
pub const FRAME_NULL: FrameNumber = FrameNumber::MAX;

const WORD_BITS: usize = usize::BITS as usize;
const FRAMES_LENGTH: usize = NUM_FRAMES / WORD_BITS;

/// Frames below this number back the kernel image and the kernel pool.
const FRAMES_BOOKED: FrameNumber = (KPOOL_END_PHYS / PAGE_SIZE) as FrameNumber;

pub(crate) struct FrameBitmap {
    words: [usize; FRAMES_LENGTH],
}

impl FrameBitmap {
    pub(crate) const fn new() -> Self {
        Self {
            words: [0; FRAMES_LENGTH],
        }
    }

    fn is_set(&self, frame: FrameNumber) -> bool {
        let frame = frame as usize;
        self.words[frame / WORD_BITS] & (1 << (frame % WORD_BITS)) != 0
    }

    fn set(&mut self, frame: FrameNumber) {
        let frame = frame as usize;
        self.words[frame / WORD_BITS] |= 1 << (frame % WORD_BITS);
    }

    fn clear(&mut self, frame: FrameNumber) {
        let frame = frame as usize;
        self.words[frame / WORD_BITS] &= !(1 << (frame % WORD_BITS));
    }

    /// First-fit search for a clear bit.
    pub(crate) fn alloc_any(&mut self) -> FrameNumber {
        for (i, word) in self.words.iter_mut().enumerate() {
            if *word != usize::MAX {
                let bit = word.trailing_ones() as usize;
                *word |= 1 << bit;
                return (i * WORD_BITS + bit) as FrameNumber;
            }
        }
        error!("frame allocator overflow");
        FRAME_NULL
    }

    pub(crate) fn free(&mut self, frame: FrameNumber) -> Result<()> {
        if !frame_is_valid(frame) {
            return Err(Error::InvalidArgs);
        }
        if !self.is_set(frame) {
            error!("double free (frame={:#x})", frame);
            return Err(Error::InvalidArgs);
        }
        self.clear(frame);
        Ok(())
    }

    /// Books every frame of `[base, end)` as allocated. Already-booked
    /// frames are left as they are.
    pub(crate) fn book_range(&mut self, base: Paddr, end: Paddr) -> Result<()> {
        let first = (base >> PAGE_SHIFT) as FrameNumber;
        let last = (end.min(NUM_FRAMES << PAGE_SHIFT) >> PAGE_SHIFT) as FrameNumber;
        if first as usize >= NUM_FRAMES {
            return Ok(());
        }
        for frame in first..last {
            self.set(frame);
        }
        Ok(())
    }
}

static FRAMES: SpinLock<FrameBitmap> = SpinLock::new(FrameBitmap::new());

/// Checks whether `frame` refers to a physical frame of the machine.
pub fn frame_is_valid(frame: FrameNumber) -> bool {
    (frame as usize) < NUM_FRAMES
}

/// Translates a user-frame index into its absolute frame number.
pub fn frame_id_to_num(id: u32) -> Result<FrameNumber> {
    if id as usize >= NUM_UFRAMES {
        return Err(Error::InvalidArgs);
    }
    Ok(id + FRAMES_BOOKED)
}

/// Translates an absolute frame number into its user-frame index.
pub fn frame_num_to_id(frame: FrameNumber) -> Result<u32> {
    if frame < FRAMES_BOOKED || !frame_is_valid(frame) {
        return Err(Error::InvalidArgs);
    }
    Ok(frame - FRAMES_BOOKED)
}

/// Allocates a page frame, first-fit.
///
/// Returns [`FRAME_NULL`] when the physical memory is exhausted.
pub fn frame_alloc() -> FrameNumber {
    FRAMES.lock_irq_disabled().alloc_any()
}

/// Releases a previously allocated page frame.
///
/// Freeing a frame twice is detected and rejected.
pub fn frame_free(frame: FrameNumber) -> Result<()> {
    FRAMES.lock_irq_disabled().free(frame)
}

/// Initializes the frame allocator.
///
/// Books the kernel-resident ranges, then consumes the boot memory map to
/// book whatever it marks reserved or malfunctioning.
pub(crate) fn init() {
    info!("initializing the page frame allocator");

    let mut frames = FRAMES.lock_irq_disabled();

    info!("booking kernel address range");
    frames
        .book_range(KERNEL_BASE_PHYS, KERNEL_END_PHYS)
        .expect("failed to book kernel page frames");

    info!("booking kpool address range");
    frames
        .book_range(KPOOL_BASE_PHYS, KPOOL_END_PHYS)
        .expect("failed to book kpool page frames");

    for entry in mmap::entries() {
        if entry.typ != mmap::MmapType::Available {
            frames
                .book_range(entry.base, entry.base + entry.size)
                .expect("failed to book mapped region");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn booked_bitmap() -> FrameBitmap {
        let mut frames = FrameBitmap::new();
        frames.book_range(KERNEL_BASE_PHYS, KERNEL_END_PHYS).unwrap();
        frames.book_range(KPOOL_BASE_PHYS, KPOOL_END_PHYS).unwrap();
        frames
    }

    #[test]
    fn allocations_are_unique() {
        let mut frames = booked_bitmap();
        let f1 = frames.alloc_any();
        let f2 = frames.alloc_any();
        assert_ne!(f1, FRAME_NULL);
        assert_ne!(f2, FRAME_NULL);
        assert_ne!(f1, f2);
    }

    #[test]
    fn frame_lifecycle() {
        let mut frames = booked_bitmap();
        let f = frames.alloc_any();
        assert_ne!(f, FRAME_NULL);
        assert_eq!(frames.free(f), Ok(()));
        assert_eq!(frames.free(f), Err(Error::InvalidArgs));
    }

    #[test]
    fn free_rejects_invalid_frame() {
        let mut frames = booked_bitmap();
        assert_eq!(frames.free(NUM_FRAMES as FrameNumber), Err(Error::InvalidArgs));
    }

    #[test]
    fn conservation() {
        let mut frames = booked_bitmap();

        // Drain the whole user frame space.
        let mut allocated = Vec::with_capacity(NUM_UFRAMES);
        for _ in 0..NUM_UFRAMES {
            let f = frames.alloc_any();
            assert_ne!(f, FRAME_NULL);
            allocated.push(f);
        }
        assert_eq!(frames.alloc_any(), FRAME_NULL);

        // Refill and drain again; the allocator must recover completely.
        for f in &allocated {
            frames.free(*f).unwrap();
        }
        let mut second = std::collections::HashSet::new();
        for _ in 0..NUM_UFRAMES {
            let f = frames.alloc_any();
            assert_ne!(f, FRAME_NULL);
            assert!(second.insert(f));
        }
    }

    #[test]
    fn id_translation_round_trip() {
        for id in [0u32, 1, 1000, (NUM_UFRAMES - 1) as u32] {
            let num = frame_id_to_num(id).unwrap();
            assert_eq!(frame_num_to_id(num).unwrap(), id);
        }
        assert!(frame_id_to_num(NUM_UFRAMES as u32).is_err());
        assert!(frame_num_to_id(0).is_err());
        assert!(frame_num_to_id(FRAME_NULL).is_err());
    }

    #[test]
    fn booked_ranges_never_alloc() {
        let mut frames = booked_bitmap();
        let f = frames.alloc_any();
        assert!(f >= FRAMES_BOOKED);
    }
}
