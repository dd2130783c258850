use std::mem::size_of;

use byteorder::{ByteOrder, LittleEndian};
use nix::libc::{c_long, c_ulong};
use nix::sys::ptrace;
use nix::unistd::Pid;

/// Size of the `PTRACE_PEEKDATA`/`PTRACE_POKEDATA` transfer unit.
const WORD_SIZE: usize = size_of::<c_long>();

type Word = [u8; WORD_SIZE];

/// Reads memory from the stopped thread with the given ID.
pub fn read_process_memory(tid: Pid, addr: u64, buf: &mut [u8]) -> crate::sys::Result<()> {
    read_words(addr, buf, |addr| peek(tid, addr))
}

/// Writes memory into the stopped thread with the given ID.
pub fn write_process_memory(tid: Pid, addr: u64, buf: &[u8]) -> crate::sys::Result<()> {
    write_words(addr, buf, |addr| peek(tid, addr), |addr, word| poke(tid, addr, word))
}

fn peek(tid: Pid, addr: u64) -> crate::sys::Result<Word> {
    let data = ptrace::read(tid, addr as ptrace::AddressType).inspect_err(
        |e| tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "ptrace(PTRACE_PEEKDATA)"),
    )?;

    let mut word = Word::default();
    LittleEndian::write_uint(&mut word, data as c_ulong as u64, WORD_SIZE);

    Ok(word)
}

fn poke(tid: Pid, addr: u64, word: &Word) -> crate::sys::Result<()> {
    let data = LittleEndian::read_uint(word, WORD_SIZE) as c_ulong as c_long;

    ptrace::write(tid, addr as ptrace::AddressType, data).inspect_err(
        |e| tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "ptrace(PTRACE_POKEDATA)"),
    )?;

    Ok(())
}

fn read_words<R>(addr: u64, buf: &mut [u8], mut peek: R) -> crate::sys::Result<()>
where
    R: FnMut(u64) -> crate::sys::Result<Word>,
{
    let mut read_addr = addr;

    for chunk in buf.chunks_mut(WORD_SIZE) {
        let word = peek(read_addr)?;
        chunk.copy_from_slice(&word[..chunk.len()]);

        read_addr += WORD_SIZE as u64;
    }

    Ok(())
}

fn write_words<R, W>(addr: u64, buf: &[u8], mut peek: R, mut poke: W) -> crate::sys::Result<()>
where
    R: FnMut(u64) -> crate::sys::Result<Word>,
    W: FnMut(u64, &Word) -> crate::sys::Result<()>,
{
    let mut data_to_write = buf.chunks_exact(WORD_SIZE);

    let mut write_addr = addr;

    for chunk in &mut data_to_write {
        let mut word = Word::default();
        word.copy_from_slice(chunk);

        poke(write_addr, &word)?;

        write_addr += WORD_SIZE as u64;
    }

    let remainder = data_to_write.remainder();

    if !remainder.is_empty() {
        // keep the bytes following the written range
        let mut word = peek(write_addr)?;

        word[..remainder.len()].copy_from_slice(remainder);

        poke(write_addr, &word)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use test_log::test;

    use super::{WORD_SIZE, Word, read_words, write_words};

    const BASE: u64 = 0x1000;

    struct Memory(RefCell<Vec<u8>>);

    impl Memory {
        fn new(len: usize) -> Self {
            Self(RefCell::new((0..len).map(|i| i as u8).collect()))
        }

        fn peek(&self, addr: u64) -> crate::sys::Result<Word> {
            let start = (addr - BASE) as usize;
            let mut word = Word::default();
            word.copy_from_slice(&self.0.borrow()[start..start + WORD_SIZE]);
            Ok(word)
        }

        fn poke(&self, addr: u64, word: &Word) -> crate::sys::Result<()> {
            let start = (addr - BASE) as usize;
            self.0.borrow_mut()[start..start + WORD_SIZE].copy_from_slice(word);
            Ok(())
        }
    }

    #[test]
    fn write_partial_word_keeps_trailing_bytes() {
        let mem = Memory::new(4 * WORD_SIZE);
        let before = mem.0.borrow().clone();

        let data = vec![0xcc; WORD_SIZE + 3];
        write_words(BASE + 1, &data, |a| mem.peek(a), |a, w| mem.poke(a, w)).unwrap();

        let after = mem.0.borrow();

        assert_eq!(after[0], before[0]);
        assert_eq!(&after[1..1 + data.len()], data.as_slice());
        assert_eq!(&after[1 + data.len()..], &before[1 + data.len()..]);
    }

    #[test]
    fn write_single_byte() {
        let mem = Memory::new(2 * WORD_SIZE);
        let before = mem.0.borrow().clone();

        write_words(BASE + 3, &[0xcc], |a| mem.peek(a), |a, w| mem.poke(a, w)).unwrap();

        let after = mem.0.borrow();

        assert_eq!(after[3], 0xcc);
        assert_eq!(&after[..3], &before[..3]);
        assert_eq!(&after[4..], &before[4..]);
    }

    #[test]
    fn read_unaligned_length() {
        let mem = Memory::new(3 * WORD_SIZE);

        let mut buf = vec![0u8; WORD_SIZE + 1];
        read_words(BASE + 2, &mut buf, |a| mem.peek(a)).unwrap();

        let expected: Vec<u8> = (2..2 + buf.len()).map(|i| i as u8).collect();
        assert_eq!(buf, expected);
    }
}
