pub mod registry;
pub mod state;

pub use registry::{PoolHandle, PoolRegistry};
pub use state::{EffectivePrices, LpChange, PoolDelta, PoolState};
