//! RSS (Receive Side Scaling) prediction and verification
//!
//! Given the hash key, hash functions and redirection table of a device, this crate
//! computes the Toeplitz hash a NIC is expected to compute for a packet, the receive
//! queue it should land on, and checks an observed queue against the prediction.

#[macro_use]
extern crate log;

mod capability;
mod error;
mod hash_functions;
mod packet_fields;
mod predict;
mod reta;
pub mod toeplitz;
mod tuple;
mod verify;

pub use capability::*;
pub use error::RssError;
pub use hash_functions::*;
pub use packet_fields::*;
pub use predict::{symmetric_rule_from_config, RssPredictor};
pub use reta::*;
pub use toeplitz::{toeplitz_hash, toeplitz_hash_words, RssKey};
pub use tuple::*;
pub use verify::*;
