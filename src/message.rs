//! The closed set of messages exchanged between the coordinator and the parties.
//!
//! Messages only ever carry field elements, flags and the scheme descriptor. Every element is
//! range-checked against the receiver's field before it is used.

use serde::{Deserialize, Serialize};

use crate::{dealer::TripleShare, field::Field, field::Scheme};

/// A protocol message, tagged by phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Sent by a party to register for a run.
    Join {
        /// The scheme the party is configured for.
        scheme: Scheme,
        /// The number of parties the party expects.
        parties: usize,
    },
    /// The party's shares of both input vectors and of one triple per index.
    InputShares {
        /// Shares of `x`.
        x: Vec<u64>,
        /// Shares of `y`.
        y: Vec<u64>,
        /// Shares of the triples, one per index.
        triples: Vec<TripleShare>,
        /// Whether the party should also return a share of the dot product.
        want_dot: bool,
    },
    /// The party's masked values `d = x - a` and `e = y - b`.
    MaskReport {
        /// Masked shares of `x`.
        d: Vec<u64>,
        /// Masked shares of `y`.
        e: Vec<u64>,
    },
    /// The opened masks plus the party's shares of the cross terms `d * e`.
    MaskedBroadcast {
        /// The public `d` per index.
        d: Vec<u64>,
        /// The public `e` per index.
        e: Vec<u64>,
        /// The party's shares of `d * e` per index.
        cross_terms: Vec<u64>,
    },
    /// The party's shares of the products and optionally of the dot product.
    ResultReport {
        /// Shares of `x_j * y_j`.
        products: Vec<u64>,
        /// Share of the dot product, if requested.
        dot: Option<u64>,
    },
}

impl Message {
    /// The name of the variant, used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Join { .. } => "Join",
            Message::InputShares { .. } => "InputShares",
            Message::MaskReport { .. } => "MaskReport",
            Message::MaskedBroadcast { .. } => "MaskedBroadcast",
            Message::ResultReport { .. } => "ResultReport",
        }
    }

    /// Checks that every field element is in range and that all vectors have length `len`.
    ///
    /// `Join` carries no field elements and is always valid.
    pub fn validate<F: Field>(&self, field: &F, len: usize) -> Result<(), String> {
        match self {
            Message::Join { .. } => Ok(()),
            Message::InputShares { x, y, triples, .. } => {
                check_elems(field, "x", x, len)?;
                check_elems(field, "y", y, len)?;
                check_len("triples", triples.len(), len)?;
                for (j, TripleShare { a, b, c }) in triples.iter().enumerate() {
                    if ![a, b, c].iter().all(|v| field.contains(**v)) {
                        return Err(format!("triple share {j} is outside of the field"));
                    }
                }
                Ok(())
            }
            Message::MaskReport { d, e } => {
                check_elems(field, "d", d, len)?;
                check_elems(field, "e", e, len)
            }
            Message::MaskedBroadcast { d, e, cross_terms } => {
                check_elems(field, "d", d, len)?;
                check_elems(field, "e", e, len)?;
                check_elems(field, "cross_terms", cross_terms, len)
            }
            Message::ResultReport { products, dot } => {
                check_elems(field, "products", products, len)?;
                match dot {
                    Some(dot) if !field.contains(*dot) => {
                        Err(format!("dot share {dot} is outside of the field"))
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

fn check_len(name: &str, actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} elements in {name}, got {actual}"))
    }
}

fn check_elems<F: Field>(field: &F, name: &str, elems: &[u64], len: usize) -> Result<(), String> {
    check_len(name, elems.len(), len)?;
    match elems.iter().position(|x| !field.contains(*x)) {
        Some(j) => Err(format!(
            "{name}[{j}] = {} is outside of {:?}",
            elems[j],
            field.scheme()
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Gf2, PrimeField};

    #[test]
    fn accepts_canonical_elements() {
        let field = PrimeField::new(67).unwrap();
        let msg = Message::MaskedBroadcast {
            d: vec![0, 66],
            e: vec![1, 2],
            cross_terms: vec![3, 4],
        };
        assert_eq!(msg.validate(&field, 2), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_elements() {
        let field = PrimeField::new(67).unwrap();
        let msg = Message::MaskReport {
            d: vec![1, 67],
            e: vec![0, 0],
        };
        assert!(msg.validate(&field, 2).unwrap_err().contains("d[1]"));

        let msg = Message::ResultReport {
            products: vec![0],
            dot: Some(2),
        };
        assert!(msg.validate(&Gf2, 1).is_err());

        let msg = Message::InputShares {
            x: vec![1],
            y: vec![0],
            triples: vec![TripleShare { a: 0, b: 5, c: 1 }],
            want_dot: false,
        };
        assert!(msg.validate(&Gf2, 1).is_err());
    }

    #[test]
    fn rejects_wrong_lengths() {
        let msg = Message::MaskReport {
            d: vec![1, 0],
            e: vec![0],
        };
        assert!(msg.validate(&Gf2, 2).unwrap_err().contains("in e"));
    }

    #[test]
    fn wire_roundtrip_keeps_variant() {
        let msg = Message::Join {
            scheme: Scheme::Additive { modulus: 67 },
            parties: 3,
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: Message = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert!(bincode::deserialize::<Message>(&[9, 0, 0, 0]).is_err());
    }
}
