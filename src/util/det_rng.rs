//! Seeded generator for victim selection.
//!
//! Every node draws its steal targets from its own xorshift64 stream. The
//! stream is seeded from the configured seed mixed with the node name, so two
//! nodes sharing a config still pick different victims while a single node
//! replays the same choices run after run.

/// xorshift64 generator used to pick steal victims.
///
/// Not cryptographically secure.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a generator from a raw seed. Zero is mapped to one.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Creates a generator for one node: the seed is mixed with an FNV-1a
    /// hash of the node name.
    #[must_use]
    pub fn for_node(seed: u64, node: &str) -> Self {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in node.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Self::new(seed ^ hash)
    }

    /// Next raw value.
    #[allow(clippy::missing_const_for_fn)]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform index in `[0, bound)`, or `None` when `bound` is zero.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_index(&mut self, bound: usize) -> Option<usize> {
        if bound == 0 {
            return None;
        }
        Some((self.next_u64() as usize) % bound)
    }

    /// Picks one element uniformly at random.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        let index = self.next_index(items.len())?;
        items.get(index)
    }
}
