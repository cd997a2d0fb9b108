// SPDX-License-Identifier: MPL-2.0

//! Boot modules.
//!
//! The loader leaves the user images it carried in memory and records them
//! here; `spawn` resolves an image pointer back to its module to learn the
//! image bounds.

use crate::prelude::*;

/// A boot module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Kmod {
    /// First byte of the module image.
    pub base: Vaddr,
    /// Size of the image in bytes.
    pub size: usize,
    /// Command line recorded by the loader.
    pub cmdline: &'static str,
}

static KMODS: SpinLock<Vec<Kmod>> = SpinLock::new(Vec::new());

/// Records a boot module.
pub fn register(base: Vaddr, size: usize, cmdline: &'static str) -> Result<()> {
    if size == 0 {
        return_errno!(Errno::EINVAL);
    }
    KMODS.lock_irq_disabled().push(Kmod {
        base,
        size,
        cmdline,
    });
    Ok(())
}

/// Gets the boot module at `index`.
pub fn get(index: usize) -> Result<Kmod> {
    KMODS
        .lock_irq_disabled()
        .get(index)
        .copied()
        .ok_or(Error::new(Errno::ENOENT))
}

/// Finds the module whose image covers `addr`.
pub fn find_by_addr(addr: Vaddr) -> Result<Kmod> {
    KMODS
        .lock_irq_disabled()
        .iter()
        .find(|m| (m.base..m.base + m.size).contains(&addr))
        .copied()
        .ok_or(Error::new(Errno::ENOENT))
}

/// Number of recorded modules.
pub fn count() -> usize {
    KMODS.lock_irq_disabled().len()
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn clear() {
        KMODS.lock_irq_disabled().clear();
    }

    #[test]
    fn lookup_by_index_and_address() {
        let _env = crate::test_util::env_lock();
        clear();

        register(0x1000, 0x200, "init").unwrap();
        register(0x4000, 0x100, "shell").unwrap();

        assert_eq!(get(0).unwrap().cmdline, "init");
        assert_eq!(get(2), Err(Error::new(Errno::ENOENT)));

        assert_eq!(find_by_addr(0x1100).unwrap().base, 0x1000);
        assert_eq!(find_by_addr(0x1200), Err(Error::new(Errno::ENOENT)));

        assert_eq!(register(0x5000, 0, ""), Err(Error::new(Errno::EINVAL)));
        clear();
    }
}
