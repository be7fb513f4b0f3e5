//! Error handling for anser.
//!
//! All crates in the workspace use [`AnserError`] and [`AnserResult`].

mod error;

pub use error::{AnserError, AnserResult, GenericError};
