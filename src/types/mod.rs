pub mod common;
pub mod error;
pub mod event;
pub mod settlement;
pub mod trade;
pub mod wad;

pub use common::*;
pub use error::*;
pub use event::*;
pub use settlement::*;
pub use trade::*;
pub use wad::*;
