//! Full-threshold (N-out-of-N) additive secret sharing over a [`Field`].

use std::ops::Index;

use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};

use crate::{
    field::Field,
    protocol::{Failure, FailureKind},
};

/// One share per party of a single secret, ordered by party index.
///
/// The Field-sum of all shares equals the shared secret. Fewer than all shares reveal nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareVector(Vec<u64>);

impl ShareVector {
    /// The share held by `party`.
    pub fn share_of(&self, party: usize) -> u64 {
        self.0[party]
    }

    /// The number of shares, which equals the number of parties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no shares.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The shares, ordered by party index.
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl Index<usize> for ShareVector {
    type Output = u64;

    fn index(&self, party: usize) -> &u64 {
        &self.0[party]
    }
}

/// Splits secrets into shares for a fixed number of parties and reconstructs them.
#[derive(Debug, Clone, Copy)]
pub struct SecretSharer<F> {
    field: F,
    parties: usize,
}

impl<F: Field> SecretSharer<F> {
    /// Creates a sharer for `parties` parties, at least 2.
    pub fn new(field: F, parties: usize) -> Result<Self, Failure> {
        if parties < 2 {
            return Err(Failure::new(
                FailureKind::InvalidInput,
                None,
                format!("at least 2 parties are required, got {parties}"),
            ));
        }
        Ok(Self { field, parties })
    }

    /// The field the shares live in.
    pub fn field(&self) -> &F {
        &self.field
    }

    /// The number of shares produced per secret.
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Shares `secret` into one uniformly random share per party.
    ///
    /// The first `parties - 1` shares are sampled independently, the last one is chosen so that
    /// all shares sum to `secret`.
    pub fn share<R: Rng + CryptoRng + ?Sized>(
        &self,
        secret: u64,
        rng: &mut R,
    ) -> Result<ShareVector, Failure> {
        if !self.field.contains(secret) {
            return Err(Failure::new(
                FailureKind::InvalidInput,
                None,
                format!("secret {secret} is outside of {:?}", self.field.scheme()),
            ));
        }
        let mut shares = Vec::with_capacity(self.parties);
        let mut last = secret;
        for _ in 1..self.parties {
            let share = self.field.sample(rng);
            last = self.field.sub(last, share);
            shares.push(share);
        }
        shares.push(last);
        Ok(ShareVector(shares))
    }

    /// Reconstructs a secret from exactly one share per party.
    pub fn reconstruct(&self, shares: &[u64]) -> Result<u64, Failure> {
        if shares.len() != self.parties {
            return Err(Failure::new(
                FailureKind::MalformedMessage,
                None,
                format!(
                    "expected {} shares for reconstruction, got {}",
                    self.parties,
                    shares.len()
                ),
            ));
        }
        if let Some(share) = shares.iter().find(|s| !self.field.contains(**s)) {
            return Err(Failure::new(
                FailureKind::MalformedMessage,
                None,
                format!("share {share} is outside of {:?}", self.field.scheme()),
            ));
        }
        Ok(self.field.sum(shares.iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::field::{Gf2, PrimeField};

    proptest! {
        #[test]
        fn additive_shares_reconstruct(secret in 0u64..67, parties in 2usize..8, seed in any::<u64>()) {
            let sharer = SecretSharer::new(PrimeField::new(67).unwrap(), parties).unwrap();
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let shares = sharer.share(secret, &mut rng).unwrap();
            prop_assert_eq!(shares.len(), parties);
            prop_assert_eq!(sharer.reconstruct(shares.as_slice()).unwrap(), secret);
        }

        #[test]
        fn xor_shares_reconstruct(secret in 0u64..2, parties in 2usize..8, seed in any::<u64>()) {
            let sharer = SecretSharer::new(Gf2, parties).unwrap();
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let shares = sharer.share(secret, &mut rng).unwrap();
            prop_assert!(shares.as_slice().iter().all(|s| *s <= 1));
            prop_assert_eq!(sharer.reconstruct(shares.as_slice()).unwrap(), secret);
        }
    }

    #[test]
    fn rejects_out_of_domain_secrets() {
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let err = SecretSharer::new(Gf2, 3)
            .unwrap()
            .share(2, &mut rng)
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidInput);

        let sharer = SecretSharer::new(PrimeField::new(67).unwrap(), 3).unwrap();
        let err = sharer.share(67, &mut rng).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn rejects_single_party() {
        let err = SecretSharer::new(Gf2, 1).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn reconstruction_requires_all_shares() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let sharer = SecretSharer::new(PrimeField::new(67).unwrap(), 3).unwrap();
        let shares = sharer.share(42, &mut rng).unwrap();
        let err = sharer.reconstruct(&shares.as_slice()[..2]).unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedMessage);
        let err = sharer.reconstruct(&[1, 2, 67]).unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedMessage);
    }

    #[test]
    fn missing_share_is_consistent_with_every_secret() {
        // with 2 of 3 shares fixed, each secret is explained by exactly one value of the third
        let field = PrimeField::new(11).unwrap();
        let sharer = SecretSharer::new(field, 3).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let shares = sharer.share(5, &mut rng).unwrap();
        let known = [shares[0], shares[1]];
        let mut explained = [0usize; 11];
        for missing in 0..11 {
            let secret = sharer.reconstruct(&[known[0], known[1], missing]).unwrap();
            explained[secret as usize] += 1;
        }
        assert!(explained.iter().all(|count| *count == 1));
    }

    #[test]
    fn xor_shares_are_unbiased_given_all_but_one() {
        // over all 8 share vectors of 3 parties, every prefix of 2 shares occurs once per secret
        let sharer = SecretSharer::new(Gf2, 3).unwrap();
        let mut counts = [[0usize; 2]; 4];
        for a in 0..2 {
            for b in 0..2 {
                for c in 0..2 {
                    let secret = sharer.reconstruct(&[a, b, c]).unwrap();
                    counts[(a * 2 + b) as usize][secret as usize] += 1;
                }
            }
        }
        assert!(counts.iter().flatten().all(|count| *count == 1));
    }
}
