// SPDX-License-Identifier: MPL-2.0

//! The identity (IAM) facility.
//!
//! Every process carries an identity: real, effective and saved user and
//! group ids. Identities live in a fixed table and are addressed through
//! typed handles carrying a generation counter, so a handle kept across a
//! drop goes stale instead of aliasing the next tenant. The root identity
//! is allocated at init, has every id equal to zero, and is immortal.

use log::{error, warn};

use crate::{config::PROCESS_MAX, prelude::*};

/// A user id.
pub type Uid = u32;

/// A group id.
pub type Gid = u32;

/// The user id of the superuser.
pub const ROOT_UID: Uid = 0;

/// A handle to an identity.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IdentityId {
    slot: u16,
    generation: u16,
}

#[derive(Clone, Copy, Default)]
struct Identity {
    uid: Uid,
    gid: Gid,
    euid: Uid,
    egid: Gid,
    suid: Uid,
    sgid: Gid,
}

impl Identity {
    fn is_superuser(&self) -> bool {
        self.uid == ROOT_UID || self.euid == ROOT_UID
    }
}

struct IamTable {
    used: [bool; PROCESS_MAX],
    generations: [u16; PROCESS_MAX],
    identities: [Identity; PROCESS_MAX],
    initialized: bool,
}

impl IamTable {
    const fn new() -> Self {
        Self {
            used: [false; PROCESS_MAX],
            generations: [0; PROCESS_MAX],
            identities: [Identity {
                uid: 0,
                gid: 0,
                euid: 0,
                egid: 0,
                suid: 0,
                sgid: 0,
            }; PROCESS_MAX],
            initialized: false,
        }
    }

    fn get(&self, id: IdentityId) -> Result<&Identity> {
        let slot = id.slot as usize;
        if slot >= PROCESS_MAX || !self.used[slot] || self.generations[slot] != id.generation {
            error!("invalid identity handle");
            return_errno!(Errno::EINVAL);
        }
        Ok(&self.identities[slot])
    }

    fn get_mut(&mut self, id: IdentityId) -> Result<&mut Identity> {
        let slot = id.slot as usize;
        if slot >= PROCESS_MAX || !self.used[slot] || self.generations[slot] != id.generation {
            error!("invalid identity handle");
            return_errno!(Errno::EINVAL);
        }
        Ok(&mut self.identities[slot])
    }

    fn alloc(&mut self) -> Option<IdentityId> {
        for slot in 0..PROCESS_MAX {
            if !self.used[slot] {
                self.used[slot] = true;
                return Some(IdentityId {
                    slot: slot as u16,
                    generation: self.generations[slot],
                });
            }
        }
        error!("identity table overflow");
        None
    }

    fn free(&mut self, id: IdentityId) -> Result<()> {
        self.get(id)?;
        let slot = id.slot as usize;
        self.used[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.identities[slot] = Identity::default();
        Ok(())
    }
}

static TABLE: SpinLock<IamTable> = SpinLock::new(IamTable::new());

/// The root identity occupies the first slot and is never recycled.
const ROOT: IdentityId = IdentityId {
    slot: 0,
    generation: 0,
};

/// Returns the root identity.
pub fn root() -> IdentityId {
    ROOT
}

/// Allocates a new identity, cloned from `base`.
pub fn new(base: IdentityId) -> Result<IdentityId> {
    let mut table = TABLE.lock_irq_disabled();
    let base_identity = *table.get(base)?;
    let id = table.alloc().ok_or(Error::new(Errno::ENOMEM))?;
    *table.get_mut(id)? = base_identity;
    Ok(id)
}

/// Releases a previously allocated identity.
///
/// The root identity cannot be dropped.
pub fn drop_(id: IdentityId) -> Result<()> {
    if id == ROOT {
        error!("cannot drop root identity");
        return_errno!(Errno::EINVAL);
    }
    TABLE.lock_irq_disabled().free(id)
}

/// Checks whether `id` carries superuser rights: either its real or its
/// effective user id is root's.
pub fn is_superuser(id: IdentityId) -> Result<bool> {
    Ok(TABLE.lock_irq_disabled().get(id)?.is_superuser())
}

/// Gets the real user id stored in an identity.
pub fn getuid(id: IdentityId) -> Result<Uid> {
    Ok(TABLE.lock_irq_disabled().get(id)?.uid)
}

/// Gets the effective user id stored in an identity.
pub fn geteuid(id: IdentityId) -> Result<Uid> {
    Ok(TABLE.lock_irq_disabled().get(id)?.euid)
}

/// Gets the real group id stored in an identity.
pub fn getgid(id: IdentityId) -> Result<Gid> {
    Ok(TABLE.lock_irq_disabled().get(id)?.gid)
}

/// Gets the effective group id stored in an identity.
pub fn getegid(id: IdentityId) -> Result<Gid> {
    Ok(TABLE.lock_irq_disabled().get(id)?.egid)
}

/// Sets the real user id stored in an identity.
///
/// A superuser sets the real, effective and saved ids at once. Anyone else
/// may only switch the effective id to the real or the saved one.
pub fn setuid(id: IdentityId, uid: Uid) -> Result<()> {
    let mut table = TABLE.lock_irq_disabled();
    let identity = table.get_mut(id)?;

    if identity.is_superuser() {
        identity.uid = uid;
        identity.euid = uid;
        identity.suid = uid;
        return Ok(());
    }

    if identity.uid == uid || identity.suid == uid {
        identity.euid = uid;
        return Ok(());
    }

    warn!("permission denied");
    return_errno!(Errno::EPERM);
}

/// Sets the effective user id stored in an identity.
pub fn seteuid(id: IdentityId, euid: Uid) -> Result<()> {
    let mut table = TABLE.lock_irq_disabled();
    let identity = table.get_mut(id)?;

    if identity.is_superuser() || identity.euid == euid {
        identity.euid = euid;
        return Ok(());
    }

    warn!("permission denied");
    return_errno!(Errno::EPERM);
}

/// Sets the real group id stored in an identity.
pub fn setgid(id: IdentityId, gid: Gid) -> Result<()> {
    let mut table = TABLE.lock_irq_disabled();
    let identity = table.get_mut(id)?;

    if identity.is_superuser() {
        identity.gid = gid;
        identity.egid = gid;
        identity.sgid = gid;
        return Ok(());
    }

    if identity.gid == gid || identity.sgid == gid {
        identity.egid = gid;
        return Ok(());
    }

    warn!("permission denied");
    return_errno!(Errno::EPERM);
}

/// Sets the effective group id stored in an identity.
pub fn setegid(id: IdentityId, egid: Gid) -> Result<()> {
    let mut table = TABLE.lock_irq_disabled();
    let identity = table.get_mut(id)?;

    if identity.is_superuser() || identity.egid == egid {
        identity.egid = egid;
        return Ok(());
    }

    warn!("permission denied");
    return_errno!(Errno::EPERM);
}

/// Initializes the identity facility and allocates the root identity.
pub fn init() {
    let mut table = TABLE.lock_irq_disabled();
    if table.initialized {
        warn!("identity facility already initialized");
        return;
    }

    let id = table.alloc().expect("failed to allocate root identity");
    debug_assert_eq!(id, ROOT);
    table.initialized = true;
}

#[cfg(test)]
mod test {
    use super::*;

    fn setup() -> IdentityId {
        init();
        new(root()).unwrap()
    }

    #[test]
    fn identity_lifecycle() {
        let _env = crate::test_util::env_lock();
        let id = setup();
        assert_eq!(setuid(id, 7), Ok(()));
        assert_eq!(getuid(id), Ok(7));
        assert_eq!(drop_(id), Ok(()));
        // The handle went stale with the drop.
        assert_eq!(getuid(id), Err(Error::new(Errno::EINVAL)));
    }

    #[test]
    fn root_is_immortal() {
        let _env = crate::test_util::env_lock();
        init();
        assert_eq!(drop_(root()), Err(Error::new(Errno::EINVAL)));
        assert_eq!(getuid(root()), Ok(0));
        assert_eq!(is_superuser(root()), Ok(true));
    }

    #[test]
    fn superuser_setuid_sets_all_three() {
        let _env = crate::test_util::env_lock();
        let id = setup();

        setuid(id, 5).unwrap();
        assert_eq!(getuid(id), Ok(5));
        assert_eq!(geteuid(id), Ok(5));
        // No path back to root once every id was given away.
        assert_eq!(setuid(id, 0), Err(Error::new(Errno::EPERM)));

        drop_(id).unwrap();
    }

    #[test]
    fn posix_rule_matrix() {
        let _env = crate::test_util::env_lock();
        let id = setup();

        // Become a plain user with real=saved=1, then switch eff to 2...
        setuid(id, 1).unwrap();
        // ...which a plain user cannot do directly; stage it as superuser
        // would have: real=saved=1, eff=2 is modeled by seteuid from a
        // state where eff already equals 2. Build it the long way.
        {
            let mut table = TABLE.lock_irq_disabled();
            let identity = table.get_mut(id).unwrap();
            identity.uid = 1;
            identity.suid = 1;
            identity.euid = 2;
        }

        assert_eq!(setuid(id, 3), Err(Error::new(Errno::EPERM)));
        // `uid == euid` alone grants nothing; only real and saved count.
        assert_eq!(setuid(id, 2), Err(Error::new(Errno::EPERM)));
        assert_eq!(setuid(id, 1), Ok(()));
        assert_eq!(geteuid(id), Ok(1));
        assert_eq!(seteuid(id, 1), Ok(()));
        assert_eq!(seteuid(id, 3), Err(Error::new(Errno::EPERM)));

        drop_(id).unwrap();
    }

    #[test]
    fn group_rules_mirror_user_rules() {
        let _env = crate::test_util::env_lock();
        let id = setup();

        setgid(id, 4).unwrap();
        // Still a superuser through uid 0, so anything goes.
        assert_eq!(getegid(id), Ok(4));

        // Drop user privileges, then group changes obey the plain rules.
        setuid(id, 9).unwrap();
        assert_eq!(setgid(id, 8), Err(Error::new(Errno::EPERM)));
        assert_eq!(setgid(id, 4), Ok(()));
        assert_eq!(setegid(id, 4), Ok(()));
        assert_eq!(setegid(id, 5), Err(Error::new(Errno::EPERM)));

        drop_(id).unwrap();
    }

    #[test]
    fn clone_copies_every_id() {
        let _env = crate::test_util::env_lock();
        let base = setup();
        setgid(base, 6).unwrap();
        setuid(base, 3).unwrap();

        let child = new(base).unwrap();
        assert_eq!(getuid(child), Ok(3));
        assert_eq!(getgid(child), Ok(6));

        drop_(child).unwrap();
        drop_(base).unwrap();
    }
}
