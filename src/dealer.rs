//! The coordinator as a trusted dealer, providing Beaver triples in shared form.
//!
//! The dealer sees every triple in the clear while generating it. This is inherent to the
//! trusted-dealer model; removing it would require OT-based triple generation.

use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use tracing::{Level, instrument};

use crate::{
    field::Field,
    protocol::{Failure, FailureKind},
    sharing::{SecretSharer, ShareVector},
};

/// Shares of a random triple `(a, b, c)` with `c = a * b`. Must only ever be used once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaverTriple {
    /// Shares of `a`.
    pub a: ShareVector,
    /// Shares of `b`.
    pub b: ShareVector,
    /// Shares of `c = a * b`.
    pub c: ShareVector,
}

impl BeaverTriple {
    /// The slice of this triple held by `party`.
    pub fn share_of(&self, party: usize) -> TripleShare {
        TripleShare {
            a: self.a.share_of(party),
            b: self.b.share_of(party),
            c: self.c.share_of(party),
        }
    }
}

/// A single party's shares of a [`BeaverTriple`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripleShare {
    /// Share of `a`.
    pub a: u64,
    /// Share of `b`.
    pub b: u64,
    /// Share of `c`.
    pub c: u64,
}

/// Generates batches of Beaver triples.
#[derive(Debug, Clone, Copy)]
pub struct TripleGenerator<F> {
    sharer: SecretSharer<F>,
}

impl<F: Field> TripleGenerator<F> {
    /// Creates a generator producing triples shared with `sharer`.
    pub fn new(sharer: SecretSharer<F>) -> Self {
        Self { sharer }
    }

    /// Generates `n` independent triples.
    #[instrument(level = Level::DEBUG, skip(self, rng), err)]
    pub fn generate<R: Rng + CryptoRng + ?Sized>(
        &self,
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<BeaverTriple>, Failure> {
        let field = self.sharer.field();
        let mut triples = Vec::with_capacity(n);
        for j in 0..n {
            let a = field.sample(rng);
            let b = field.sample(rng);
            let c = field.mul(a, b);
            if c != field.mul(a, b) || !field.contains(c) {
                return Err(invariant_violation(j));
            }
            let triple = BeaverTriple {
                a: self.sharer.share(a, rng)?,
                b: self.sharer.share(b, rng)?,
                c: self.sharer.share(c, rng)?,
            };
            if !self.holds(&triple) {
                return Err(invariant_violation(j));
            }
            triples.push(triple);
        }
        Ok(triples)
    }

    /// Reconstructs the triple and checks `c = a * b`.
    fn holds(&self, triple: &BeaverTriple) -> bool {
        let open = |s: &ShareVector| self.sharer.reconstruct(s.as_slice()).ok();
        match (open(&triple.a), open(&triple.b), open(&triple.c)) {
            (Some(a), Some(b), Some(c)) => c == self.sharer.field().mul(a, b),
            _ => false,
        }
    }
}

fn invariant_violation(j: usize) -> Failure {
    Failure::new(
        FailureKind::ArithmeticInvariantViolation,
        None,
        format!("beaver triple {j} does not satisfy c = a * b"),
    )
}
