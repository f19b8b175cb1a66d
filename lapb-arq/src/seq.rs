//! Modulo sequence-number arithmetic.
//!
//! Every window and validity check in the engine is phrased in terms of the
//! two primitives defined here:
//!
//! - [`distance`]`(a, b)`: how far `b` is ahead of `a`, always in
//!   `[0, modulus)`.
//! - [`in_window`]`(x, lo, len)`: whether `x` lies in the half-open range of
//!   `len` sequence numbers starting at `lo`.
//!
//! Sequence numbers are carried as `u8`; the modulus is either 8 (LAPB basic,
//! NET/ROM, ROSE) or 128 (LAPB extended).

/// Sequence numbering scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Modulus {
    /// Numbers cycle through 0 to 7; single-byte control field.
    #[default]
    Normal = 8,
    /// Numbers cycle through 0 to 127; two-byte control field.
    Extended = 128,
}

impl Modulus {
    /// Number of distinct sequence numbers.
    #[inline]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// `true` for the 128 scheme.
    #[inline]
    pub const fn is_extended(self) -> bool {
        matches!(self, Modulus::Extended)
    }

    /// Largest usable window for this modulus (`modulus - 1`).
    #[inline]
    pub const fn max_window(self) -> u8 {
        self.value() - 1
    }

    /// Largest window for which an acknowledgment trailing V(A) can never
    /// be mistaken for one inside `[V(A), V(S)]`.
    #[inline]
    pub const fn reorder_safe_window(self) -> u8 {
        (self.value() - 1) / 2
    }
}

impl std::fmt::Display for Modulus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mod {}", self.value())
    }
}

/// Distance from `a` forward to `b`, in `[0, modulus)`.
#[inline]
pub fn distance(a: u8, b: u8, modulus: Modulus) -> u8 {
    let m = u16::from(modulus.value());
    ((u16::from(b) + m - u16::from(a) % m) % m) as u8
}

/// `true` when `x` is one of the `len` numbers starting at `lo`.
#[inline]
pub fn in_window(x: u8, lo: u8, len: u8, modulus: Modulus) -> bool {
    distance(lo, x, modulus) < len
}

/// The number following `seq`.
#[inline]
pub fn next(seq: u8, modulus: Modulus) -> u8 {
    add(seq, 1, modulus)
}

/// `seq + n`, wrapped.
#[inline]
pub fn add(seq: u8, n: u8, modulus: Modulus) -> u8 {
    ((u16::from(seq) + u16::from(n)) % u16::from(modulus.value())) as u8
}
