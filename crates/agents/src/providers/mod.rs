//! Model transports.

pub mod gemini;

pub use gemini::GeminiTransport;
