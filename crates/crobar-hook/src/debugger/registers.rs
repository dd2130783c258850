/// Single-step enable bit of the x86 `EFLAGS` register.
pub const TRAP_FLAG: u64 = 0x100;

/// Trait for implementing the register state of a stopped thread.
pub trait Registers {
    /// Returns the instruction address.
    fn instr_addr(&self) -> u64;

    /// Modifies the instruction address.
    fn set_instr_addr(&mut self, addr: u64);

    /// Returns the stack address.
    fn stack_addr(&self) -> u64;

    /// Returns the flags register.
    fn flags(&self) -> u64;

    /// Modifies the flags register.
    fn set_flags(&mut self, flags: u64);

    /// Returns whether single-step mode is enabled.
    fn trap_flag(&self) -> bool {
        self.flags() & TRAP_FLAG != 0
    }

    /// Enables or disables single-step mode, leaving other flags untouched.
    fn set_trap_flag(&mut self, enable: bool) {
        let flags = self.flags();

        if enable {
            self.set_flags(flags | TRAP_FLAG);
        } else {
            self.set_flags(flags & !TRAP_FLAG);
        }
    }
}
