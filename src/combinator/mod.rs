//! Combinators composing several promises into one.
//!
//! | Combinator | Settles when | Rejects |
//! |---|---|---|
//! | [`all`] / [`when`] | every input fulfilled | on the first rejection, tagged with its index |
//! | [`join`] | every input settled | never |
//! | [`join_fulfilled`] | every input settled | with `JoinError` if any input rejected |
//! | [`race`] | the first input settles | if that input rejected |
//! | [`race_fulfilled`] | the first input fulfills | with `NoWinner` once all have rejected |
//! | [`after`] / [`delay`] | the timer fires | never |
//! | [`timeout`] | the input settles or the timer fires | with `OperationCancelled` on timeout |
//! | [`retry_until`] | an attempt round fulfills | when `decide` gives up |
//!
//! Inputs are anything convertible into a [`Thenable`](crate::Thenable): promises,
//! or bare values wrapped in `Thenable::Value`. Losing or late inputs keep
//! resolving on their own; their outcome no longer affects the aggregate.

mod after;
mod all;
mod join;
mod race;
mod retry;

pub use after::{after, after_seconds, delay};
pub use all::{all, all2, all3, when};
pub use join::{join, join_fulfilled, Joined};
pub use race::{race, race_fulfilled, timeout};
pub use retry::{retry_until, retry_until_on};
