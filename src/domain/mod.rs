pub mod aggregates;
pub mod features;
pub mod forecast;
pub mod readings;
pub mod region;

pub use aggregates::*;
pub use features::*;
pub use forecast::*;
pub use readings::*;
pub use region::*;
