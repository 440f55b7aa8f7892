use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::host::Host;

/// Width of ring identifiers in bits.
pub const KEY_BITS: u32 = 32;

/// Size of the identifier space, 2^32.
const MODULUS: u64 = 1 << KEY_BITS;

/// An identifier on the Chord ring.
///
/// Keys live in the circular space `[0, 2^32)`; every node and every stored
/// entry is addressed by one. Construction normalises the input into the
/// space, so arithmetic on the raw value can never escape it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(u32);

impl Key {
    pub fn new(value: u64) -> Key {
        Key((value % MODULUS) as u32)
    }

    /// Derive the key of a node from the host it is bound to.
    pub fn of_host(host: &Host) -> Key {
        let mut hasher = DefaultHasher::new();
        host.hash(&mut hasher);
        Key::new(hasher.finish())
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Whether this key lies on the clockwise arc `(lower, upper]`.
    ///
    /// The arc may wrap around zero. When `lower == upper` the arc is the
    /// full circle and every key lies on it.
    pub fn is_between(self, lower: Key, upper: Key) -> bool {
        if lower.0 < upper.0 {
            self.0 > lower.0 && self.0 <= upper.0
        } else {
            self.0 > lower.0 || self.0 <= upper.0
        }
    }

    /// The start of the `bits`-th finger arc: `(self + 2^bits) mod 2^32`.
    ///
    /// Finger 0 targets the key immediately after this one; each further
    /// finger doubles the distance, which is what gives lookups their
    /// logarithmic hop count.
    pub fn shift(self, bits: u32) -> Key {
        debug_assert!(bits < KEY_BITS);
        Key(self.0.wrapping_add(1 << bits))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
