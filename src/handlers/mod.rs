pub mod stt;

pub use stt::*;
