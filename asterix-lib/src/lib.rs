#![doc = include_str!("../README.md")]

mod error;
mod fspec;

pub mod bits;
pub mod codec;
pub mod item;
pub mod record;
pub mod schema;

pub use error::{Error, Result};
