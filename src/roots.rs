//! The root set: static roots registered by the host, plus conservative scanning of the
//! mutator's stack and saved registers (spec §4.6).
//!
//! Stack maps are explicitly out of scope (spec §1 Non-goals), so every candidate word found
//! on the stack, in the saved registers, or at a registered static root address is treated as
//! a *possible* pointer: the collector resolves it to an enclosing heap object if it can, and
//! otherwise ignores it. This can only cause over-retention, never a dangling reference
//! (spec §9, "Conservative scanning").

use crate::address::Address;

/// Registered static roots: addresses of pointer-sized slots the host owns, re-read on every
/// scan since the host may have overwritten the slot between collections (spec §4.6).
pub struct RootSet {
    static_roots: Vec<Address>,
    /// The stack address captured at `create`, used as the conservative upper bound (the
    /// stack's "oldest" extent) for every subsequent scan.
    stack_base: Address,
}

impl RootSet {
    pub fn new(stack_base: Address) -> Self {
        RootSet {
            static_roots: Vec::new(),
            stack_base,
        }
    }

    /// Idempotent per spec §9's open-question resolution: registering the same address twice
    /// only adds it once.
    pub fn add_static_root(&mut self, address: Address) {
        if !self.static_roots.contains(&address) {
            self.static_roots.push(address);
        }
    }

    /// Every candidate pointer-sized word currently reachable as a root: the live contents of
    /// each static-root slot, then every word between the current stack pointer and the
    /// stack base captured at `create`, then every saved register.
    pub fn candidates(&self) -> Vec<Address> {
        let mut out = Vec::with_capacity(self.static_roots.len() + 64);
        for &slot in &self.static_roots {
            let value = unsafe { slot.load_usize() };
            if value != 0 {
                out.push(Address::from_usize(value));
            }
        }
        let current_sp = current_stack_pointer();
        scan_stack_range(current_sp, self.stack_base, &mut out);
        for reg in capture_registers() {
            if reg != 0 {
                out.push(Address::from_usize(reg));
            }
        }
        out
    }
}

/// Read every pointer-sized word in `[low, high)` as a candidate. The stack conventionally
/// grows down, so `low` is the current stack pointer and `high` is the base captured at
/// `create`.
fn scan_stack_range(low: Address, high: Address, out: &mut Vec<Address>) {
    if low.as_usize() >= high.as_usize() {
        return;
    }
    let aligned_low = low.align_up(std::mem::size_of::<usize>());
    let mut addr = aligned_low;
    while addr.as_usize() + std::mem::size_of::<usize>() <= high.as_usize() {
        let value = unsafe { addr.load_usize() };
        if value != 0 {
            out.push(Address::from_usize(value));
        }
        addr += std::mem::size_of::<usize>();
    }
}

/// An approximation of the current stack pointer, taken as the address of a local variable
/// in this frame. Good enough for conservative scanning: every frame below this one (i.e.
/// every frame that could hold a live reference the mutator pushed before calling into the
/// collector) lies between this address and `stack_base`.
#[inline(never)]
pub fn current_stack_pointer() -> Address {
    let probe: usize = 0;
    Address::from_ptr(&probe)
}

/// Force live registers to be spilled onto the stack and also return them directly, so that
/// a reference kept only in a callee-saved register (never spilled by the optimizer) is
/// still found. This is the "platform-specific setjmp-like capture" spec §4.6 allows.
///
/// # Safety considerations
/// This reads raw register contents as `usize`; interpreting a non-pointer register value as
/// an address is safe here because the result only ever feeds conservative *candidate*
/// resolution (spec §9), which discards anything that doesn't resolve to a real object.
pub fn capture_registers() -> Vec<usize> {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        let (rbx, rbp, r12, r13, r14, r15): (usize, usize, usize, usize, usize, usize);
        std::arch::asm!(
            "mov {0}, rbx",
            "mov {1}, rbp",
            "mov {2}, r12",
            "mov {3}, r13",
            "mov {4}, r14",
            "mov {5}, r15",
            out(reg) rbx,
            out(reg) rbp,
            out(reg) r12,
            out(reg) r13,
            out(reg) r14,
            out(reg) r15,
        );
        return vec![rbx, rbp, r12, r13, r14, r15];
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        let (x19, x20, x21, x22, x23, x24, x25, x26, x27, x28, fp): (
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
            usize,
        );
        std::arch::asm!(
            "mov {0}, x19",
            "mov {1}, x20",
            "mov {2}, x21",
            "mov {3}, x22",
            "mov {4}, x23",
            "mov {5}, x24",
            "mov {6}, x25",
            "mov {7}, x26",
            "mov {8}, x27",
            "mov {9}, x28",
            "mov {10}, x29",
            out(reg) x19,
            out(reg) x20,
            out(reg) x21,
            out(reg) x22,
            out(reg) x23,
            out(reg) x24,
            out(reg) x25,
            out(reg) x26,
            out(reg) x27,
            out(reg) x28,
            out(reg) fp,
        );
        return vec![x19, x20, x21, x22, x23, x24, x25, x26, x27, x28, fp];
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        // No register-capture support for this target; the stack scan above still covers
        // anything the mutator has spilled, which in practice is everything by the time a
        // call has crossed into the collector's `collect` entry point.
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_a_static_root_twice_is_idempotent() {
        let mut roots = RootSet::new(Address::ZERO);
        let slot = Address::from_usize(0x1000);
        roots.add_static_root(slot);
        roots.add_static_root(slot);
        assert_eq!(roots.static_roots.len(), 1);
    }

    #[test]
    fn candidates_reads_the_current_value_of_a_static_root() {
        let mut value: usize = 0xdead_beef;
        let slot = Address::from_mut_ptr(&mut value as *mut usize);
        let mut roots = RootSet::new(Address::ZERO);
        roots.add_static_root(slot);
        assert!(roots.candidates().contains(&Address::from_usize(0xdead_beef)));

        value = 0;
        assert!(!roots.candidates().contains(&Address::from_usize(0xdead_beef)));
    }

    #[test]
    fn scan_stack_range_collects_nonzero_words_in_range() {
        let words: [usize; 4] = [0, 0x1111, 0, 0x2222];
        let low = Address::from_ptr(words.as_ptr());
        let high = low + std::mem::size_of_val(&words);
        let mut out = Vec::new();
        scan_stack_range(low, high, &mut out);
        assert!(out.contains(&Address::from_usize(0x1111)));
        assert!(out.contains(&Address::from_usize(0x2222)));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn scan_stack_range_is_empty_when_low_is_not_below_high() {
        let mut out = Vec::new();
        scan_stack_range(Address::from_usize(100), Address::from_usize(100), &mut out);
        assert!(out.is_empty());
    }
}
