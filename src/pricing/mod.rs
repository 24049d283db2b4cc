pub mod impact;
pub mod relaxation;

pub use impact::{LinearImpactModel, PriceImpactModel};
pub use relaxation::{RelaxationRate, elapsed_secs, relax};
