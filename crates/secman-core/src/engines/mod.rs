//! Built-in engines.

pub mod kv;
pub mod logopass;

pub use kv::KvEngine;
pub use logopass::LogopassEngine;
