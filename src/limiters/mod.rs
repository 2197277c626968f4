pub mod event;
pub mod limiter;
pub mod merge;
pub mod window_counter;

pub use event::Event;
pub use limiter::{CounterSnapshot, Limiter, MergeReport};
pub use merge::MergeOutcome;
pub use window_counter::{WindowCounter, WindowSpec};
