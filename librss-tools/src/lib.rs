#[macro_use]
extern crate log;

mod capture;
mod config;
mod error;
mod five_tuple;

pub use capture::*;
pub use config::Config;
pub use error::*;
pub use five_tuple::*;
