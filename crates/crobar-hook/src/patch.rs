use crate::debugger::MemoryAccess;
use crate::error::{DebuggerError, Error};

/// Outcome of a successful [patch_memory] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The original bytes were found and replaced.
    Applied,

    /// The replacement bytes were already in place.
    AlreadyApplied,
}

/// Replaces `old` bytes at `addr` with `new` bytes, after checking that the
/// debuggee holds the expected data.
///
/// Applying the same patch twice is harmless: the second call finds the
/// replacement bytes and returns [PatchOutcome::AlreadyApplied] without
/// writing anything.
///
/// # Errors
///
/// Nothing is written if `old` and `new` differ in length, or if the
/// debuggee holds neither `old` nor `new` at `addr` (in which case the
/// bytes found are returned in [Error::UnexpectedData]).
pub fn patch_memory<M: MemoryAccess>(
    mem: &mut M,
    addr: u64,
    old: &[u8],
    new: &[u8],
) -> crate::Result<PatchOutcome, M::Error> {
    if old.len() != new.len() {
        return Err(Error::PatchLengthMismatch {
            addr,
            old: old.len(),
            new: new.len(),
        });
    }

    let found = mem.read_bytes(addr, old.len()).map_err(DebuggerError)?;

    if found == old {
        mem.write_memory(addr, new).map_err(DebuggerError)?;

        tracing::debug!(addr = format_args!("{addr:#x}"), len = new.len(), "patch applied");

        Ok(PatchOutcome::Applied)
    } else if found == new {
        tracing::debug!(addr = format_args!("{addr:#x}"), "patch already applied");

        Ok(PatchOutcome::AlreadyApplied)
    } else {
        Err(Error::UnexpectedData { addr, found })
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::{PatchOutcome, patch_memory};
    use crate::Error;
    use crate::testing::{FakeError, FakeSession, MEMORY_BASE, MEMORY_SIZE};

    const ADDR: u64 = MEMORY_BASE + 0x10;

    #[test]
    fn patch_applied_once() {
        let mut session = FakeSession::new();
        let old = session.memory[0x10..0x12].to_vec();

        let outcome = patch_memory(&mut session, ADDR, &old, &[0xeb, 0xfe]).unwrap();
        assert_eq!(outcome, PatchOutcome::Applied);
        assert_eq!(&session.memory[0x10..0x12], &[0xeb, 0xfe]);

        let outcome = patch_memory(&mut session, ADDR, &old, &[0xeb, 0xfe]).unwrap();
        assert_eq!(outcome, PatchOutcome::AlreadyApplied);
        assert_eq!(session.writes.len(), 1);
    }

    #[test]
    fn patch_unexpected_data() {
        let mut session = FakeSession::new();
        session.memory[0x10..0x13].copy_from_slice(&[0x55, 0x89, 0xe5]);

        let err = patch_memory(&mut session, ADDR, &[0x90, 0x90, 0x90], &[0xc3, 0x90, 0x90])
            .unwrap_err();

        match err {
            Error::UnexpectedData { addr, found } => {
                assert_eq!(addr, ADDR);
                assert_eq!(found, [0x55, 0x89, 0xe5]);
            }
            e => panic!("unexpected error: {e}"),
        }
        assert!(session.writes.is_empty());
    }

    #[test]
    fn patch_length_mismatch() {
        let mut session = FakeSession::new();

        let err = patch_memory(&mut session, ADDR, &[0x90, 0x90], &[0xc3]).unwrap_err();

        assert!(matches!(
            err,
            Error::PatchLengthMismatch { old: 2, new: 1, .. }
        ));
        assert!(session.writes.is_empty());
    }

    #[test]
    fn patch_out_of_bounds() {
        let mut session = FakeSession::new();
        let addr = MEMORY_BASE + MEMORY_SIZE as u64 - 1;

        let err = patch_memory(&mut session, addr, &[0x90, 0x90], &[0xc3, 0xc3]).unwrap_err();

        assert!(matches!(
            err,
            Error::Debugger(e) if e.0 == FakeError::AccessFault(addr)
        ));
    }
}
