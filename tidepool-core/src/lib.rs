pub mod admin;
pub mod carry;
pub mod error;
pub mod packet;
#[cfg(test)]
mod packet_test;

pub use error::{AppError, AppResult, ErrorKind};
