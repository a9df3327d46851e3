#![doc = include_str!("../README.md")]

mod error;

pub mod framing;
pub mod logcodec;
pub mod packet;
pub mod source;

pub use error::{Error, Result};
