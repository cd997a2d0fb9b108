// SPDX-License-Identifier: MPL-2.0

//! Boot-sequence integration: the layers come up in order and the public
//! surfaces answer afterwards.

use vesper_hal::mm::mmap;
use vesper_kernel::{iam, kcall, process, thread};

#[test]
fn boot_then_exercise_the_public_surfaces() {
    // The boot code commits the memory map before the kernel comes up.
    mmap::register_reserved(0, 0x10_0000).unwrap();
    mmap::register_available(0x10_0000, 0x3ff0_0000).unwrap();

    vesper_kernel::init();

    // The map survived and is queryable.
    assert_eq!(mmap::count(), 2);
    assert_eq!(mmap::get(0).unwrap().typ, mmap::MmapType::Reserved);

    // The kernel process is alive and owns the root identity.
    assert!(process::is_valid(process::KERNEL_PROCESS));
    assert_eq!(
        process::identity_of(process::KERNEL_PROCESS).unwrap(),
        iam::root()
    );
    assert_eq!(thread::current_pid(), process::KERNEL_PROCESS);

    // Fast-path kernel calls answer in place.
    assert_eq!(kcall::do_kcall(kcall::KcallNr::Void1 as u32, 41, 0, 0, 0, 0), 41);
    assert_eq!(
        kcall::do_kcall(kcall::KcallNr::Void5 as u32, 1, 2, 3, 4, 5),
        15
    );

    // Frame allocation round-trips through the call boundary, and the
    // frames handed out lie past the kernel-booked ranges.
    let frame = kcall::do_kcall(kcall::KcallNr::Fralloc as u32, 0, 0, 0, 0, 0);
    assert!(frame > 0);
    assert_eq!(
        kcall::do_kcall(kcall::KcallNr::Frfree as u32, frame as usize, 0, 0, 0, 0),
        0
    );

    // A process can be created and torn down again.
    let pid = process::create(0x1000, 0x100).unwrap();
    assert!(process::is_valid(pid));
    let identity = process::identity_of(pid).unwrap();
    process::exit(pid);
    assert!(!process::is_valid(pid));
    assert!(iam::getuid(identity).is_err());
}
