//! Assembly emission for the target VM.

mod asm;

pub use asm::generate;

/// Register roles of the 16-register VM calling convention.
///
/// R0 holds the flags and R1 the instruction pointer; neither is ever
/// addressed by emitted code. Arguments beyond the four register slots are
/// passed on the stack, rightmost first, 4 bytes each.
pub const REG_RETVAL: u32 = 2; // R2: return value / first argument
pub const MAX_REG_ARGS: usize = 4; // R2..R5 carry arguments
pub const SCRATCH: [u32; 4] = [8, 9, 10, 13]; // caller-saved scratches
pub const REG_FP: u32 = 11;
pub const REG_SP: u32 = 12;
pub const REG_RA: u32 = 14;
pub const REG_IO: u32 = 15;
