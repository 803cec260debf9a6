pub mod collaborators;
pub mod messaging;

pub use collaborators::*;
pub use messaging::*;
