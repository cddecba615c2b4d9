//! Semi-honest multi-party multiplication and dot products using Beaver triples.
//!
//! A coordinator holding two private vectors `x` and `y` secret-shares them among N parties,
//! deals one Beaver triple per index and lets the parties compute shares of the element-wise
//! products `x_j * y_j` and of the dot product, without any single party learning anything about
//! `x` or `y`.
//!
//! ## Schemes
//!
//! - Additive sharing over the integers modulo a prime ([`field::PrimeField`])
//! - XOR sharing of bits ([`field::Gf2`])
//!
//! Both are full-threshold: all N shares are needed to reconstruct a value, and any N-1 shares
//! are independent of it.
//!
//! ## Main Components
//!
//! * [`protocol`]: [`protocol::configure`] starts a run, [`protocol::simulate_run`] runs it with
//!   in-memory parties.
//! * [`party`]: [`party::run_party`] and the pure per-party computation [`party::PartyEngine`].
//! * [`sharing`] and [`dealer`]: secret sharing and trusted-dealer triple generation.
//! * [`channel`]: Communication abstractions for exchanging data between the coordinator and
//!   the parties.
//!
//! ## Example
//!
//! ```ignore
//! use beaver_dot::{
//!     field::Scheme,
//!     protocol::{RunConfig, simulate_run},
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::new(Scheme::Additive { modulus: 67 }, 3);
//! let output = simulate_run(config, vec![4, 2, 7], vec![5, 9, 1]).await?;
//! assert_eq!(output.products, vec![20, 18, 7]);
//! assert_eq!(output.dot, Some(45));
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! Parties are assumed to follow the protocol (semi-honest). The coordinator acts as a trusted
//! dealer and sees the triples in the clear while generating them. Every run uses fresh
//! randomness and fresh triples; a failed run is never retried with the same material.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod dealer;
pub mod field;
pub mod message;
pub mod party;
pub mod protocol;
pub mod sharing;

mod coordinator;
