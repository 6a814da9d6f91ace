//! What a continuation may hand back, and what an aggregate may take in.

use crate::error::Error;
use crate::promise::Promise;
use crate::{Outcome, Value};

/// How a dependent promise should settle.
#[derive(Debug)]
pub enum Resolution<T: Value> {
    Fulfill(T),
    Reject(Error),
    /// Mirror another promise's eventual outcome.
    Follow(Promise<T>),
}

/// Conversion of a continuation's return value into a [`Resolution`].
///
/// Implemented for `Result<T, Error>`, [`Error`], [`Promise<T>`] and
/// [`Resolution<T>`]. Use `map` for continuations returning plain values.
pub trait IntoResolution<T: Value> {
    fn into_resolution(self) -> Resolution<T>;
}

impl<T: Value> IntoResolution<T> for Resolution<T> {
    fn into_resolution(self) -> Resolution<T> {
        self
    }
}

impl<T: Value> IntoResolution<T> for Outcome<T> {
    fn into_resolution(self) -> Resolution<T> {
        match self {
            Ok(value) => Resolution::Fulfill(value),
            Err(error) => Resolution::Reject(error),
        }
    }
}

impl<T: Value> IntoResolution<T> for Promise<T> {
    fn into_resolution(self) -> Resolution<T> {
        Resolution::Follow(self)
    }
}

impl<T: Value> IntoResolution<T> for Error {
    fn into_resolution(self) -> Resolution<T> {
        Resolution::Reject(self)
    }
}

/// An aggregate input: either a promise or a bare, already-available value.
#[derive(Debug, Clone)]
pub enum Thenable<T: Value> {
    Value(T),
    Promise(Promise<T>),
}

impl<T: Value> Thenable<T> {
    pub fn into_promise(self) -> Promise<T> {
        match self {
            Thenable::Value(value) => Promise::fulfilled(value),
            Thenable::Promise(promise) => promise,
        }
    }
}

impl<T: Value> From<Promise<T>> for Thenable<T> {
    fn from(promise: Promise<T>) -> Self {
        Thenable::Promise(promise)
    }
}

impl<T: Value> From<&Promise<T>> for Thenable<T> {
    fn from(promise: &Promise<T>) -> Self {
        Thenable::Promise(promise.clone())
    }
}

pub(crate) fn collect_promises<T, I>(inputs: I) -> Vec<Promise<T>>
where
    T: Value,
    I: IntoIterator,
    I::Item: Into<Thenable<T>>,
{
    inputs
        .into_iter()
        .map(|input| input.into().into_promise())
        .collect()
}
