pub mod mock_sources;
pub mod session_builder;

pub use mock_sources::*;
pub use session_builder::*;
