pub mod coordinator;


pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorStats, SetStatusOutcome,
};
