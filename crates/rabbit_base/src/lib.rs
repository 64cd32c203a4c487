/* 📖 # Why have rabbit_base as a separate crate?
rabbit_base holds the pieces that know nothing about Tetris: the error type,
tracing setup and the raw HTTP layer on top of tiny_http. The engine crate builds
the analysis endpoints on top of it, and the CLI only wires the two together.
*/

pub mod error;
pub mod http;
pub mod server;
pub mod testing;
pub mod tracing;

pub use error::{ErrorKind, RabbitError, RabbitResult, ResultExt};
