pub mod engine;
pub mod recursive;

pub use engine::*;
pub use recursive::*;
