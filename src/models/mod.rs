// src/models/mod.rs
pub mod driver;
pub mod messages;
pub mod settlement;
pub mod transition;
pub mod trip;

pub use driver::*;
pub use messages::*;
pub use settlement::*;
pub use transition::*;
pub use trip::*;
