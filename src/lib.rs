mod clock;
mod frame_budget_tracker;
mod frame_dropper;
mod media_optimization;

pub use clock::*;
pub use frame_budget_tracker::*;
pub use frame_dropper::*;
pub use media_optimization::*;
