//! Configuring and awaiting a run of the multiplication protocol.
//!
//! [`configure`] validates the inputs, then spawns the coordinator for exactly one run. The
//! returned [`RunHandle`] resolves once the run is done or has failed. Every run owns its
//! channel and its randomness, and releases both when it resolves.

use std::{future::IntoFuture, time::Duration};

use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::warn;

use crate::{
    channel::{self, Channel, ErrorKind, SimpleChannel},
    coordinator::Coordinator,
    field::{Field, Gf2, PrimeField, Scheme},
    party::run_party,
};

/// The category of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum FailureKind {
    /// An input, the modulus or the party count is outside of what the scheme allows.
    #[error("invalid input")]
    InvalidInput,
    /// A party disagrees with the coordinator on scheme, modulus or party count.
    #[error("scheme mismatch")]
    SchemeMismatch,
    /// A party did not reply within the phase timeout or its link was closed.
    #[error("missing party")]
    MissingParty,
    /// A message could not be decoded, had the wrong shape or contained out-of-range values.
    #[error("malformed message")]
    MalformedMessage,
    /// An arithmetic self-check failed, which indicates a bug.
    #[error("arithmetic invariant violation")]
    ArithmeticInvariantViolation,
    /// The run was aborted before it completed.
    #[error("aborted")]
    Aborted,
}

/// Why a run (or an operation of the protocol) failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}{}: {reason}", party_suffix(.party))]
pub struct Failure {
    /// The category of the failure.
    pub kind: FailureKind,
    /// The party that caused the failure, if any.
    pub party: Option<usize>,
    /// A human readable description.
    pub reason: String,
}

fn party_suffix(party: &Option<usize>) -> String {
    party.map(|p| format!(" (party {p})")).unwrap_or_default()
}

impl Failure {
    pub(crate) fn new(kind: FailureKind, party: Option<usize>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            party,
            reason: reason.into(),
        }
    }

    /// Classifies a channel error: undecodable messages are malformed, everything else means
    /// the other side is gone.
    pub(crate) fn from_channel(e: channel::Error, party: Option<usize>) -> Self {
        let kind = match e.reason {
            ErrorKind::SerdeError(_) => FailureKind::MalformedMessage,
            ErrorKind::RecvError(_) | ErrorKind::SendError(_) | ErrorKind::Timeout => {
                FailureKind::MissingParty
            }
        };
        Self::new(kind, party, format!("{}: {:?}", e.phase, e.reason))
    }
}

/// The configuration shared by the coordinator and the parties of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// The sharing scheme, including the modulus for additive sharing.
    pub scheme: Scheme,
    /// The number of parties, at least 2.
    pub parties: usize,
    /// Whether the dot product is computed in addition to the element-wise products.
    #[serde(default = "default_want_dot")]
    pub want_dot: bool,
    /// How long the coordinator waits for all parties in each phase.
    #[serde(default = "default_phase_timeout")]
    pub phase_timeout: Duration,
    /// Whether the coordinator checks the reconstructed outputs against the plaintext inputs.
    #[serde(default)]
    pub verify_outputs: bool,
}

fn default_want_dot() -> bool {
    true
}

fn default_phase_timeout() -> Duration {
    Duration::from_secs(30)
}

impl RunConfig {
    /// A configuration computing products and the dot product, with a 30s phase timeout.
    pub fn new(scheme: Scheme, parties: usize) -> Self {
        Self {
            scheme,
            parties,
            want_dot: default_want_dot(),
            phase_timeout: default_phase_timeout(),
            verify_outputs: false,
        }
    }

    /// Sets whether the dot product is computed.
    pub fn with_dot(mut self, want_dot: bool) -> Self {
        self.want_dot = want_dot;
        self
    }

    /// Sets the per-phase timeout.
    pub fn with_phase_timeout(mut self, phase_timeout: Duration) -> Self {
        self.phase_timeout = phase_timeout;
        self
    }

    /// Sets whether outputs are checked against the plaintext inputs before being exposed.
    pub fn with_verification(mut self, verify_outputs: bool) -> Self {
        self.verify_outputs = verify_outputs;
        self
    }
}

/// The reconstructed outputs of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    /// `x_j * y_j` for every index `j`.
    pub products: Vec<u64>,
    /// The sum of all products, if requested.
    pub dot: Option<u64>,
}

/// A handle to a configured run.
///
/// Awaiting the handle yields the outputs of the run or the reason it failed.
#[derive(Debug)]
pub struct RunHandle {
    task: JoinHandle<Result<RunOutput, Failure>>,
    abort: Option<oneshot::Sender<()>>,
}

impl RunHandle {
    /// Aborts the run. Awaiting the handle afterwards yields [`FailureKind::Aborted`] unless the
    /// run had already completed.
    pub fn abort(&mut self) {
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(());
        }
    }
}

impl IntoFuture for RunHandle {
    type Output = Result<RunOutput, Failure>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        let RunHandle { task, abort } = self;
        async move {
            let outcome = task.await;
            drop(abort);
            outcome.unwrap_or_else(|e| {
                Err(Failure::new(
                    FailureKind::Aborted,
                    None,
                    format!("coordinator task ended unexpectedly: {e}"),
                ))
            })
        }
        .boxed()
    }
}

/// Validates the inputs and starts the coordinator for a single run over `channel`.
///
/// The parties are expected at the indices `0..config.parties` of the channel. The channel is
/// owned by the run and dropped as soon as the run resolves. Must be called from within a tokio
/// runtime.
pub fn configure<C>(
    config: RunConfig,
    x: Vec<u64>,
    y: Vec<u64>,
    channel: C,
) -> Result<RunHandle, Failure>
where
    C: Channel + Send + Sync + 'static,
{
    match config.scheme {
        Scheme::Additive { modulus } => spawn_run(PrimeField::new(modulus)?, config, x, y, channel),
        Scheme::Xor => spawn_run(Gf2, config, x, y, channel),
    }
}

fn spawn_run<F, C>(
    field: F,
    config: RunConfig,
    x: Vec<u64>,
    y: Vec<u64>,
    channel: C,
) -> Result<RunHandle, Failure>
where
    F: Field,
    C: Channel + Send + Sync + 'static,
{
    let coordinator = Coordinator::new(field, &config, x, y, channel)?;
    let (abort_tx, abort_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        tokio::select! {
            outcome = coordinator.run() => outcome,
            Ok(()) = abort_rx => {
                warn!("run aborted");
                Err(Failure::new(FailureKind::Aborted, None, "run aborted by caller"))
            }
        }
    });
    Ok(RunHandle {
        task,
        abort: Some(abort_tx),
    })
}

/// Runs the protocol with `config.parties` honest in-memory parties and returns the outputs.
pub async fn simulate_run(
    config: RunConfig,
    x: Vec<u64>,
    y: Vec<u64>,
) -> Result<RunOutput, Failure> {
    let (hub, parties) = SimpleChannel::star(config.parties);
    let handle = configure(config.clone(), x, y, hub)?;
    for (p, channel) in parties.into_iter().enumerate() {
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = run_party(&channel, p, config.parties, &config).await {
                warn!("party {p} failed: {e}");
            }
        });
    }
    handle.await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = RunConfig::new(Scheme::Xor, 3);
        assert_eq!(config.phase_timeout, Duration::from_secs(30));
        assert!(config.want_dot);
        assert!(!config.verify_outputs);

        let config = config
            .with_dot(false)
            .with_phase_timeout(Duration::from_millis(50))
            .with_verification(true);
        assert!(!config.want_dot);
        assert_eq!(config.phase_timeout, Duration::from_millis(50));
        assert!(config.verify_outputs);
    }

    #[test]
    fn failure_display_names_the_party() {
        let failure = Failure::new(FailureKind::MissingParty, Some(2), "timeout");
        assert_eq!(failure.to_string(), "missing party (party 2): timeout");
        let failure = Failure::new(FailureKind::InvalidInput, None, "x[0] = 3");
        assert_eq!(failure.to_string(), "invalid input: x[0] = 3");
    }

    #[test]
    fn channel_errors_are_classified() {
        let timeout = channel::Error {
            phase: "masks".to_string(),
            reason: ErrorKind::Timeout,
        };
        assert_eq!(
            Failure::from_channel(timeout, Some(1)).kind,
            FailureKind::MissingParty
        );
        let garbage = channel::Error {
            phase: "masks".to_string(),
            reason: ErrorKind::SerdeError("invalid tag".to_string()),
        };
        assert_eq!(
            Failure::from_channel(garbage, Some(1)).kind,
            FailureKind::MalformedMessage
        );
    }

    #[tokio::test]
    async fn configure_rejects_invalid_inputs() {
        let cases = [
            (RunConfig::new(Scheme::Xor, 3), vec![1, 0], vec![1]),
            (RunConfig::new(Scheme::Xor, 3), vec![1, 2], vec![1, 0]),
            (
                RunConfig::new(Scheme::Additive { modulus: 67 }, 3),
                vec![67],
                vec![1],
            ),
            (
                RunConfig::new(Scheme::Additive { modulus: 68 }, 3),
                vec![1],
                vec![1],
            ),
            (RunConfig::new(Scheme::Xor, 1), vec![1], vec![1]),
        ];
        for (config, x, y) in cases {
            let (hub, _parties) = SimpleChannel::star(config.parties);
            let err = configure(config, x, y, hub).unwrap_err();
            assert_eq!(err.kind, FailureKind::InvalidInput);
        }
    }
}
