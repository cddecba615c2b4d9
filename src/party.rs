//! The computation performed identically by every party.
//!
//! [`PartyEngine`] is a pure function of a party's own shares and the public values broadcast by
//! the coordinator. It does not know the number of parties or who the other parties are.
//! [`run_party`] drives a single party through one run over a [`Channel`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

use crate::{
    channel::{Channel, recv_from, send_to},
    dealer::TripleShare,
    field::{Field, Gf2, PrimeField, Scheme},
    message::Message,
    protocol::{Failure, FailureKind, RunConfig},
};

/// A party's masked input shares for a single multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedPair {
    /// `x - a`
    pub d: u64,
    /// `y - b`
    pub e: u64,
}

/// A party's shares of the outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultShares {
    /// One share per product `x_j * y_j`.
    pub products: Vec<u64>,
    /// The share of the dot product, i.e. the sum of all product shares.
    pub dot: Option<u64>,
}

/// The per-batch computation of a single party.
#[derive(Debug, Clone, Copy)]
pub struct PartyEngine<F> {
    field: F,
}

impl<F: Field> PartyEngine<F> {
    /// Creates an engine computing over `field`.
    pub fn new(field: F) -> Self {
        Self { field }
    }

    /// Masks the input shares with the triple shares: `d_j = x_j - a_j`, `e_j = y_j - b_j`.
    pub fn mask(
        &self,
        x: &[u64],
        y: &[u64],
        triples: &[TripleShare],
    ) -> Result<Vec<MaskedPair>, Failure> {
        if x.len() != y.len() || x.len() != triples.len() {
            return Err(length_mismatch(&[x.len(), y.len(), triples.len()]));
        }
        let f = &self.field;
        Ok(x.iter()
            .zip(y)
            .zip(triples)
            .map(|((x, y), t)| MaskedPair {
                d: f.sub(*x, t.a),
                e: f.sub(*y, t.b),
            })
            .collect())
    }

    /// Computes the product shares from the opened masks and the cross term shares.
    ///
    /// Since `x * y = (d + a) * (e + b) = d*e + d*b + e*a + a*b`, each party contributes
    /// `de_j + d_j * b_j + e_j * a_j + c_j`. The public `d*e` enters exactly once because the
    /// coordinator shares it instead of every party adding it.
    pub fn finalize(
        &self,
        d: &[u64],
        e: &[u64],
        cross_terms: &[u64],
        triples: &[TripleShare],
        want_dot: bool,
    ) -> Result<ResultShares, Failure> {
        let n = triples.len();
        if d.len() != n || e.len() != n || cross_terms.len() != n {
            return Err(length_mismatch(&[d.len(), e.len(), cross_terms.len(), n]));
        }
        let f = &self.field;
        let products: Vec<u64> = (0..n)
            .map(|j| {
                let TripleShare { a, b, c } = triples[j];
                let term = f.add(cross_terms[j], f.mul(d[j], b));
                let term = f.add(term, f.mul(e[j], a));
                f.add(term, c)
            })
            .collect();
        let dot = want_dot.then(|| f.sum(products.iter().copied()));
        Ok(ResultShares { products, dot })
    }
}

fn length_mismatch(lens: &[usize]) -> Failure {
    Failure::new(
        FailureKind::MalformedMessage,
        None,
        format!("vectors of a batch must have equal lengths, got {lens:?}"),
    )
}

/// Executes the protocol for one party and returns its result shares.
///
/// `coordinator` is the channel index of the coordinator.
#[instrument(level = Level::DEBUG, skip(channel, config), err)]
pub async fn run_party(
    channel: &(impl Channel + Sync),
    party: usize,
    coordinator: usize,
    config: &RunConfig,
) -> Result<ResultShares, Failure> {
    match config.scheme {
        Scheme::Additive { modulus } => {
            drive(channel, coordinator, PrimeField::new(modulus)?, config).await
        }
        Scheme::Xor => drive(channel, coordinator, Gf2, config).await,
    }
}

async fn drive<F: Field>(
    channel: &(impl Channel + Sync),
    coordinator: usize,
    field: F,
    config: &RunConfig,
) -> Result<ResultShares, Failure> {
    // the coordinator may itself wait a full phase for the slowest party before replying
    let max_wait = config.phase_timeout.saturating_mul(2);
    let engine = PartyEngine::new(field);
    let join = Message::Join {
        scheme: field.scheme(),
        parties: config.parties,
    };
    send(channel, coordinator, "join", &join).await?;

    let msg = recv(channel, coordinator, "input shares", max_wait).await?;
    let Message::InputShares {
        x,
        y,
        triples,
        want_dot,
    } = &msg
    else {
        return Err(unexpected("InputShares", &msg));
    };
    validate(&msg, &field, x.len())?;
    let n = x.len();
    debug!(n, want_dot, "received input shares");

    let (d, e) = engine.mask(x, y, triples)?.into_iter().map(|m| (m.d, m.e)).unzip();
    send(channel, coordinator, "masks", &Message::MaskReport { d, e }).await?;

    let public = recv(channel, coordinator, "public values", max_wait).await?;
    let Message::MaskedBroadcast { d, e, cross_terms } = &public else {
        return Err(unexpected("MaskedBroadcast", &public));
    };
    validate(&public, &field, n)?;

    let shares = engine.finalize(d, e, cross_terms, triples, *want_dot)?;
    let report = Message::ResultReport {
        products: shares.products.clone(),
        dot: shares.dot,
    };
    send(channel, coordinator, "results", &report).await?;
    debug!("sent result shares");
    Ok(shares)
}

async fn send(
    channel: &(impl Channel + Sync),
    coordinator: usize,
    phase: &str,
    msg: &Message,
) -> Result<(), Failure> {
    send_to(channel, coordinator, phase, msg)
        .await
        .map_err(|e| Failure::from_channel(e, None))
}

async fn recv(
    channel: &(impl Channel + Sync),
    coordinator: usize,
    phase: &str,
    max_wait: Duration,
) -> Result<Message, Failure> {
    recv_from(channel, coordinator, phase, max_wait)
        .await
        .map_err(|e| Failure::from_channel(e, None))
}

fn validate<F: Field>(msg: &Message, field: &F, len: usize) -> Result<(), Failure> {
    msg.validate(field, len)
        .map_err(|reason| Failure::new(FailureKind::MalformedMessage, None, reason))
}

fn unexpected(expected: &str, msg: &Message) -> Failure {
    Failure::new(
        FailureKind::MalformedMessage,
        None,
        format!("expected {expected}, got {}", msg.kind()),
    )
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::{
        dealer::TripleGenerator,
        sharing::{SecretSharer, ShareVector},
    };

    /// Runs both stages for all parties, playing the coordinator in between.
    fn multiply<F: Field>(
        field: F,
        parties: usize,
        x: &[u64],
        y: &[u64],
        seed: u64,
    ) -> (Vec<u64>, u64) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let sharer = SecretSharer::new(field, parties).unwrap();
        let share_all = |v: &[u64], rng: &mut ChaCha20Rng| -> Vec<ShareVector> {
            v.iter().map(|s| sharer.share(*s, rng).unwrap()).collect()
        };
        let xs = share_all(x, &mut rng);
        let ys = share_all(y, &mut rng);
        let triples = TripleGenerator::new(sharer).generate(x.len(), &mut rng).unwrap();
        let engine = PartyEngine::new(field);

        let slices: Vec<_> = (0..parties)
            .map(|p| {
                let x: Vec<_> = xs.iter().map(|s| s[p]).collect();
                let y: Vec<_> = ys.iter().map(|s| s[p]).collect();
                let t: Vec<_> = triples.iter().map(|t| t.share_of(p)).collect();
                (x, y, t)
            })
            .collect();
        let masks: Vec<_> = slices
            .iter()
            .map(|(x, y, t)| engine.mask(x, y, t).unwrap())
            .collect();
        let d: Vec<_> = (0..x.len())
            .map(|j| field.sum(masks.iter().map(|m| m[j].d)))
            .collect();
        let e: Vec<_> = (0..x.len())
            .map(|j| field.sum(masks.iter().map(|m| m[j].e)))
            .collect();
        let cross = share_all(
            &d.iter().zip(&e).map(|(d, e)| field.mul(*d, *e)).collect::<Vec<_>>(),
            &mut rng,
        );
        let results: Vec<_> = slices
            .iter()
            .enumerate()
            .map(|(p, (_, _, t))| {
                let cross: Vec<_> = cross.iter().map(|s| s[p]).collect();
                engine.finalize(&d, &e, &cross, t, true).unwrap()
            })
            .collect();
        let products = (0..x.len())
            .map(|j| {
                let column: Vec<_> = results.iter().map(|r| r.products[j]).collect();
                sharer.reconstruct(&column).unwrap()
            })
            .collect();
        let dot = sharer
            .reconstruct(&results.iter().map(|r| r.dot.unwrap()).collect::<Vec<_>>())
            .unwrap();
        (products, dot)
    }

    proptest! {
        #[test]
        fn additive_products_reconstruct(
            xy in prop::collection::vec((0u64..67, 0u64..67), 0..8),
            parties in 2usize..6,
            seed in any::<u64>(),
        ) {
            let field = PrimeField::new(67).unwrap();
            let (x, y): (Vec<u64>, Vec<u64>) = xy.into_iter().unzip();
            let (products, dot) = multiply(field, parties, &x, &y, seed);
            let expected: Vec<u64> = x.iter().zip(&y).map(|(x, y)| x * y % 67).collect();
            prop_assert_eq!(dot, expected.iter().sum::<u64>() % 67);
            prop_assert_eq!(products, expected);
        }

        #[test]
        fn xor_products_reconstruct(
            xy in prop::collection::vec((0u64..2, 0u64..2), 0..8),
            parties in 2usize..6,
            seed in any::<u64>(),
        ) {
            let (x, y): (Vec<u64>, Vec<u64>) = xy.into_iter().unzip();
            let (products, dot) = multiply(Gf2, parties, &x, &y, seed);
            let expected: Vec<u64> = x.iter().zip(&y).map(|(x, y)| x & y).collect();
            prop_assert_eq!(dot, expected.iter().fold(0, |acc, p| acc ^ p));
            prop_assert_eq!(products, expected);
        }
    }

    #[test]
    fn xor_needs_the_cross_term() {
        // x = y = 1 with a = b = 0 opens d = e = 1, so d*e is the whole product
        let engine = PartyEngine::new(Gf2);
        let triples = [TripleShare { a: 0, b: 0, c: 0 }];
        let without: Vec<_> = (0..2)
            .map(|_| engine.finalize(&[1], &[1], &[0], &triples, false).unwrap())
            .collect();
        assert_eq!(without[0].products[0] ^ without[1].products[0], 0);
        let with = [
            engine.finalize(&[1], &[1], &[1], &triples, false).unwrap(),
            engine.finalize(&[1], &[1], &[0], &triples, false).unwrap(),
        ];
        assert_eq!(with[0].products[0] ^ with[1].products[0], 1);
        assert_eq!(with[0].dot, None);
    }

    #[test]
    fn mask_subtracts_triple_shares() {
        let engine = PartyEngine::new(PrimeField::new(67).unwrap());
        let masked = engine
            .mask(&[4, 2], &[5, 9], &[TripleShare { a: 10, b: 1, c: 0 }; 2])
            .unwrap();
        assert_eq!(masked[0], MaskedPair { d: 61, e: 4 });
        assert_eq!(masked[1], MaskedPair { d: 59, e: 8 });
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let engine = PartyEngine::new(Gf2);
        let t = [TripleShare { a: 0, b: 0, c: 0 }];
        let err = engine.mask(&[1, 0], &[1], &t).unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedMessage);
        let err = engine.finalize(&[1], &[1], &[], &t, true).unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedMessage);
    }
}
