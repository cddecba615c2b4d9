//! Arithmetic over the two domains supported by the protocol.
//!
//! Elements are plain `u64`s and are always kept canonical: `[0, p)` for [`PrimeField`] and
//! `{0, 1}` for [`Gf2`]. Everything above this module is generic over [`Field`], so the
//! additive and XOR schemes share a single implementation of sharing, triple generation and
//! the multiplication protocol.

use std::fmt::Debug;

use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

use crate::protocol::{Failure, FailureKind};

/// The sharing scheme (and thereby the field) used for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    /// Additive sharing over the integers modulo a prime.
    Additive {
        /// The prime modulus `p`.
        modulus: u64,
    },
    /// XOR sharing of single bits, i.e. additive sharing over GF(2).
    Xor,
}

/// Arithmetic over a finite field whose elements are represented as `u64`.
pub trait Field: Debug + Clone + Copy + Send + Sync + 'static {
    /// The scheme descriptor of this field, exchanged during registration.
    fn scheme(&self) -> Scheme;

    /// Returns true if `x` is a canonical element of this field.
    fn contains(&self, x: u64) -> bool;

    /// Field addition.
    fn add(&self, x: u64, y: u64) -> u64;

    /// Field subtraction.
    fn sub(&self, x: u64, y: u64) -> u64;

    /// Additive inverse.
    fn neg(&self, x: u64) -> u64;

    /// Field multiplication.
    fn mul(&self, x: u64, y: u64) -> u64;

    /// The additive identity.
    fn zero(&self) -> u64 {
        0
    }

    /// Samples an element uniformly at random.
    fn sample<R: Rng + CryptoRng + ?Sized>(&self, rng: &mut R) -> u64;

    /// Sums all elements, starting from [`Field::zero`].
    fn sum(&self, elems: impl IntoIterator<Item = u64>) -> u64 {
        elems.into_iter().fold(self.zero(), |acc, x| self.add(acc, x))
    }
}

/// The integers modulo a prime `p < 2^32`.
///
/// The bound keeps the product of two canonical elements within a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimeField {
    modulus: u64,
}

impl PrimeField {
    /// Creates the field of integers modulo `modulus`, which must be a prime below `2^32`.
    pub fn new(modulus: u64) -> Result<Self, Failure> {
        if modulus > u64::from(u32::MAX) || !is_prime(modulus) {
            return Err(Failure::new(
                FailureKind::InvalidInput,
                None,
                format!("modulus {modulus} is not a prime below 2^32"),
            ));
        }
        Ok(Self { modulus })
    }

    /// The prime modulus of this field.
    pub fn modulus(&self) -> u64 {
        self.modulus
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    let mut i = 2;
    while i * i <= n {
        if n % i == 0 {
            return false;
        }
        i += 1;
    }
    true
}

impl Field for PrimeField {
    fn scheme(&self) -> Scheme {
        Scheme::Additive {
            modulus: self.modulus,
        }
    }

    fn contains(&self, x: u64) -> bool {
        x < self.modulus
    }

    fn add(&self, x: u64, y: u64) -> u64 {
        (x + y) % self.modulus
    }

    fn sub(&self, x: u64, y: u64) -> u64 {
        (x + self.modulus - y) % self.modulus
    }

    fn neg(&self, x: u64) -> u64 {
        (self.modulus - x) % self.modulus
    }

    fn mul(&self, x: u64, y: u64) -> u64 {
        (x * y) % self.modulus
    }

    fn sample<R: Rng + CryptoRng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.random_range(0..self.modulus)
    }
}

/// The binary field, where addition is XOR and multiplication is AND.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gf2;

impl Field for Gf2 {
    fn scheme(&self) -> Scheme {
        Scheme::Xor
    }

    fn contains(&self, x: u64) -> bool {
        x <= 1
    }

    fn add(&self, x: u64, y: u64) -> u64 {
        x ^ y
    }

    fn sub(&self, x: u64, y: u64) -> u64 {
        x ^ y
    }

    fn neg(&self, x: u64) -> u64 {
        x
    }

    fn mul(&self, x: u64, y: u64) -> u64 {
        x & y
    }

    fn sample<R: Rng + CryptoRng + ?Sized>(&self, rng: &mut R) -> u64 {
        u64::from(rng.random::<bool>())
    }
}
