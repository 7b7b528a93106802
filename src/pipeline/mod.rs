pub mod builder;
pub mod detector;
pub mod scheduler;
pub mod stage;
pub mod traits;
pub mod types;

pub use builder::*;
pub use detector::*;
pub use scheduler::*;
pub use stage::*;
pub use traits::*;
pub use types::*;
