pub mod automatic;
pub mod boiler;
pub mod schedule;
pub mod types;
pub mod wallbox;

pub use automatic::*;
pub use boiler::*;
pub use schedule::*;
pub use types::*;
pub use wallbox::*;
