//! The coordinator of a run, acting as input owner, trusted dealer and message hub.
//!
//! The run advances through a fixed sequence of phases. Every phase that waits for the parties
//! is a barrier: it completes once exactly one valid message of every party has arrived, and
//! fails as soon as one party times out, disconnects or sends something malformed.
//!
//! ```text
//! AwaitingParties -> PreparingBatch -> DistributingInputs -> AwaitingMasks
//!     -> DistributingPublics -> AwaitingResults -> Done
//! ```
//!
//! Any of these may end in `Failed` instead, in which case nothing is reconstructed.

use std::{ops::ControlFlow, time::Duration};

use futures::future::try_join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{Level, debug, info, instrument, warn};

use crate::{
    channel::{Channel, recv_from, send_to},
    dealer::{BeaverTriple, TripleGenerator},
    field::Field,
    message::Message,
    protocol::{Failure, FailureKind, RunConfig, RunOutput},
    sharing::{SecretSharer, ShareVector},
};

/// The phase a run is in, together with the data that is handed to the next phase.
pub(crate) enum State {
    AwaitingParties,
    PreparingBatch,
    DistributingInputs(Batch),
    AwaitingMasks,
    DistributingPublics { d: Vec<u64>, e: Vec<u64> },
    AwaitingResults,
    Done(RunOutput),
    Failed(Failure),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::AwaitingParties => "AwaitingParties",
            State::PreparingBatch => "PreparingBatch",
            State::DistributingInputs(_) => "DistributingInputs",
            State::AwaitingMasks => "AwaitingMasks",
            State::DistributingPublics { .. } => "DistributingPublics",
            State::AwaitingResults => "AwaitingResults",
            State::Done(_) => "Done",
            State::Failed(_) => "Failed",
        }
    }
}

/// Shares of the inputs and the triples of one run. Dropped once distributed.
pub(crate) struct Batch {
    x: Vec<ShareVector>,
    y: Vec<ShareVector>,
    triples: Vec<BeaverTriple>,
}

/// The channel to exactly the parties of one run.
struct Session<C> {
    channel: C,
    parties: usize,
}

pub(crate) struct Coordinator<F, C> {
    sharer: SecretSharer<F>,
    session: Session<C>,
    x: Vec<u64>,
    y: Vec<u64>,
    want_dot: bool,
    phase_timeout: Duration,
    verify_outputs: bool,
    rng: ChaCha20Rng,
}

impl<F, C> Coordinator<F, C>
where
    F: Field,
    C: Channel + Send + Sync,
{
    /// Validates the inputs of a run. Nothing is sent before the run is started.
    pub(crate) fn new(
        field: F,
        config: &RunConfig,
        x: Vec<u64>,
        y: Vec<u64>,
        channel: C,
    ) -> Result<Self, Failure> {
        let sharer = SecretSharer::new(field, config.parties)?;
        if x.len() != y.len() {
            return Err(Failure::new(
                FailureKind::InvalidInput,
                None,
                format!("x has {} elements but y has {}", x.len(), y.len()),
            ));
        }
        for (name, v) in [("x", &x), ("y", &y)] {
            if let Some(j) = v.iter().position(|v| !field.contains(*v)) {
                return Err(Failure::new(
                    FailureKind::InvalidInput,
                    None,
                    format!("{name}[{j}] = {} is outside of {:?}", v[j], field.scheme()),
                ));
            }
        }
        Ok(Self {
            sharer,
            session: Session {
                channel,
                parties: config.parties,
            },
            x,
            y,
            want_dot: config.want_dot,
            phase_timeout: config.phase_timeout,
            verify_outputs: config.verify_outputs,
            rng: ChaCha20Rng::from_rng(&mut rand::rng()),
        })
    }

    /// Executes the run to completion. The session is closed when this returns.
    #[instrument(level = Level::DEBUG, skip_all, fields(parties = self.session.parties, n = self.x.len()))]
    pub(crate) async fn run(mut self) -> Result<RunOutput, Failure> {
        let mut state = State::AwaitingParties;
        loop {
            state = match self.advance(state).await {
                ControlFlow::Continue(next) => next,
                ControlFlow::Break(outcome) => return outcome,
            };
        }
    }

    async fn advance(&mut self, state: State) -> ControlFlow<Result<RunOutput, Failure>, State> {
        let from = state.name();
        let next = self.step(state).await.unwrap_or_else(State::Failed);
        debug!("{from} -> {}", next.name());
        match next {
            State::Done(output) => {
                info!(n = output.products.len(), "run completed");
                ControlFlow::Break(Ok(output))
            }
            State::Failed(failure) => {
                warn!("run failed in {from}: {failure}");
                ControlFlow::Break(Err(failure))
            }
            next => ControlFlow::Continue(next),
        }
    }

    async fn step(&mut self, state: State) -> Result<State, Failure> {
        match state {
            State::AwaitingParties => {
                self.register().await?;
                Ok(State::PreparingBatch)
            }
            State::PreparingBatch => Ok(State::DistributingInputs(self.prepare_batch()?)),
            State::DistributingInputs(batch) => {
                self.distribute_inputs(batch).await?;
                Ok(State::AwaitingMasks)
            }
            State::AwaitingMasks => {
                let (d, e) = self.collect_masks().await?;
                Ok(State::DistributingPublics { d, e })
            }
            State::DistributingPublics { d, e } => {
                self.distribute_publics(d, e).await?;
                Ok(State::AwaitingResults)
            }
            State::AwaitingResults => Ok(State::Done(self.collect_results().await?)),
            terminal @ (State::Done(_) | State::Failed(_)) => Ok(terminal),
        }
    }

    fn field(&self) -> F {
        *self.sharer.field()
    }

    fn n(&self) -> usize {
        self.x.len()
    }

    async fn register(&self) -> Result<(), Failure> {
        let expected = self.field().scheme();
        let parties = self.session.parties;
        for (p, msg) in self.gather("join", 0).await?.into_iter().enumerate() {
            let (scheme, expected_by_party) = match msg {
                Message::Join { scheme, parties } => (scheme, parties),
                other => return Err(unexpected(p, "Join", &other)),
            };
            if scheme != expected || expected_by_party != parties {
                return Err(Failure::new(
                    FailureKind::SchemeMismatch,
                    Some(p),
                    format!(
                        "party expects {scheme:?} with {expected_by_party} parties, \
                         run uses {expected:?} with {parties} parties"
                    ),
                ));
            }
        }
        Ok(())
    }

    fn prepare_batch(&mut self) -> Result<Batch, Failure> {
        let sharer = self.sharer;
        let rng = &mut self.rng;
        let x = self
            .x
            .iter()
            .map(|v| sharer.share(*v, rng))
            .collect::<Result<Vec<_>, _>>()?;
        let y = self
            .y
            .iter()
            .map(|v| sharer.share(*v, rng))
            .collect::<Result<Vec<_>, _>>()?;
        let triples = TripleGenerator::new(sharer).generate(self.x.len(), rng)?;
        Ok(Batch { x, y, triples })
    }

    async fn distribute_inputs(&self, batch: Batch) -> Result<(), Failure> {
        let msgs = (0..self.session.parties)
            .map(|p| Message::InputShares {
                x: batch.x.iter().map(|s| s[p]).collect(),
                y: batch.y.iter().map(|s| s[p]).collect(),
                triples: batch.triples.iter().map(|t| t.share_of(p)).collect(),
                want_dot: self.want_dot,
            })
            .collect();
        self.scatter("input shares", msgs).await
    }

    async fn collect_masks(&self) -> Result<(Vec<u64>, Vec<u64>), Failure> {
        let field = self.field();
        let mut d_pub = vec![field.zero(); self.n()];
        let mut e_pub = vec![field.zero(); self.n()];
        for (p, msg) in self.gather("masks", self.n()).await?.into_iter().enumerate() {
            let (d, e) = match msg {
                Message::MaskReport { d, e } => (d, e),
                other => return Err(unexpected(p, "MaskReport", &other)),
            };
            for j in 0..self.n() {
                d_pub[j] = field.add(d_pub[j], d[j]);
                e_pub[j] = field.add(e_pub[j], e[j]);
            }
        }
        Ok((d_pub, e_pub))
    }

    async fn distribute_publics(&mut self, d: Vec<u64>, e: Vec<u64>) -> Result<(), Failure> {
        let field = self.field();
        let sharer = self.sharer;
        let rng = &mut self.rng;
        let cross_terms = d
            .iter()
            .zip(&e)
            .map(|(d, e)| sharer.share(field.mul(*d, *e), rng))
            .collect::<Result<Vec<_>, _>>()?;
        let msgs = (0..self.session.parties)
            .map(|p| Message::MaskedBroadcast {
                d: d.clone(),
                e: e.clone(),
                cross_terms: cross_terms.iter().map(|s| s[p]).collect(),
            })
            .collect();
        self.scatter("public values", msgs).await
    }

    async fn collect_results(&self) -> Result<RunOutput, Failure> {
        let mut products = vec![vec![]; self.n()];
        let mut dots = vec![];
        for (p, msg) in self.gather("results", self.n()).await?.into_iter().enumerate() {
            let (shares, dot) = match msg {
                Message::ResultReport { products, dot } => (products, dot),
                other => return Err(unexpected(p, "ResultReport", &other)),
            };
            match (self.want_dot, dot) {
                (true, Some(dot)) => dots.push(dot),
                (false, None) => {}
                (want_dot, _) => {
                    return Err(Failure::new(
                        FailureKind::MalformedMessage,
                        Some(p),
                        format!("dot share presence does not match want_dot = {want_dot}"),
                    ));
                }
            }
            for (j, share) in shares.into_iter().enumerate() {
                products[j].push(share);
            }
        }
        let products = products
            .iter()
            .map(|shares| self.sharer.reconstruct(shares))
            .collect::<Result<Vec<_>, _>>()?;
        let dot = if self.want_dot {
            Some(self.sharer.reconstruct(&dots)?)
        } else {
            None
        };
        let output = RunOutput { products, dot };
        if self.verify_outputs {
            self.verify(&output)?;
        }
        Ok(output)
    }

    /// Compares the outputs with the plaintext computation, which the dealer can always do.
    fn verify(&self, output: &RunOutput) -> Result<(), Failure> {
        let field = self.field();
        let expected: Vec<u64> = self
            .x
            .iter()
            .zip(&self.y)
            .map(|(x, y)| field.mul(*x, *y))
            .collect();
        let expected_dot = self.want_dot.then(|| field.sum(expected.iter().copied()));
        if output.products != expected || output.dot != expected_dot {
            return Err(Failure::new(
                FailureKind::ArithmeticInvariantViolation,
                None,
                "reconstructed outputs differ from the plaintext computation",
            ));
        }
        Ok(())
    }

    /// Receives one validated message from every party, concurrently.
    async fn gather(&self, phase: &str, len: usize) -> Result<Vec<Message>, Failure> {
        let field = self.field();
        let channel = &self.session.channel;
        let max_wait = self.phase_timeout;
        try_join_all((0..self.session.parties).map(|p| async move {
            let msg: Message = recv_from(channel, p, phase, max_wait)
                .await
                .map_err(|e| Failure::from_channel(e, Some(p)))?;
            msg.validate(&field, len)
                .map_err(|reason| Failure::new(FailureKind::MalformedMessage, Some(p), reason))?;
            Ok::<_, Failure>(msg)
        }))
        .await
    }

    /// Sends the i-th message to the i-th party, concurrently.
    async fn scatter(&self, phase: &str, msgs: Vec<Message>) -> Result<(), Failure> {
        let channel = &self.session.channel;
        try_join_all(msgs.into_iter().enumerate().map(|(p, msg)| async move {
            send_to(channel, p, phase, &msg)
                .await
                .map_err(|e| Failure::from_channel(e, Some(p)))
        }))
        .await?;
        Ok(())
    }
}

fn unexpected(party: usize, expected: &str, msg: &Message) -> Failure {
    Failure::new(
        FailureKind::MalformedMessage,
        Some(party),
        format!("expected {expected}, got {}", msg.kind()),
    )
}
