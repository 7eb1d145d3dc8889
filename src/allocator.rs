// ABOUTME: Process-wide monotonic packet id allocator, skipping zero on wrap
// ABOUTME: Mirrors the teacher's atomic sequence-number counters, scoped to one 16-bit ring

use std::sync::atomic::{AtomicU16, Ordering};

/// A single 16-bit atomic counter shared by every sender on a connection.
///
/// Ids wrap modulo 2^16 but never land on zero, which is reserved to mean "unset".
/// Initialized at program start, never torn down.
#[derive(Debug, Default)]
pub struct PacketIdAllocator(AtomicU16);

/// The process-wide counter. Every packet this process originates — whether it is
/// acting as a client or as a server handling many connections — draws its id from
/// this one counter, matching the source's single `static` sequence number and the
/// invariant that ids only need to be unique within one sender's connection.
pub static PACKET_ID: PacketIdAllocator = PacketIdAllocator::new();

impl PacketIdAllocator {
    pub const fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// Fetch-and-increment; if the post-increment value is zero, increment once
    /// more and use that instead. Zero is never returned.
    pub fn next(&self) -> u16 {
        let mut id = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if id == 0 {
            id = self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_returns_zero_across_two_full_wraps() {
        let allocator = PacketIdAllocator::new();
        let mut saw_wrap = 0;
        let mut previous = 0u16;
        for i in 0..(1usize << 17) {
            let id = allocator.next();
            assert_ne!(id, 0, "zero returned at allocation {i}");
            if i > 0 && id < previous {
                saw_wrap += 1;
            }
            previous = id;
        }
        assert_eq!(saw_wrap, 2, "expected exactly two wraps over 2^17 allocations");
    }

    #[test]
    fn sequential_allocations_increment() {
        let allocator = PacketIdAllocator::new();
        assert_eq!(allocator.next(), 1);
        assert_eq!(allocator.next(), 2);
        assert_eq!(allocator.next(), 3);
    }
}
