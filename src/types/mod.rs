pub mod candle;
pub mod contract;
pub mod order;
pub mod position;
pub mod state;
pub mod trading;
pub mod watch;

pub use candle::*;
pub use contract::*;
pub use order::*;
pub use position::*;
pub use state::*;
pub use trading::*;
pub use watch::*;
