//! Envelope framing over stdin/stdout.

mod envelope;
mod transport;

pub use envelope::{Envelope, EnvelopeType};
pub use transport::{stdio, Transport, TransportReader, TransportWriter};
