pub mod failure;
pub mod health;
pub mod recovery;
pub mod state;

pub use failure::*;
pub use health::*;
pub use recovery::*;
pub use state::*;
