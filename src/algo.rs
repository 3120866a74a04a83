//! The collection of implemented algorithms.

pub mod lincoa;

pub use lincoa::{ExitStatus, Lincoa, LincoaError, LincoaOptions, Minimum};
