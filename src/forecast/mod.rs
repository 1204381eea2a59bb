pub mod prices;
pub mod production;
pub mod weather;

pub use prices::*;
pub use production::*;
pub use weather::*;
