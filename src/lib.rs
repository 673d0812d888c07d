// Public modules that are part of the API
pub mod auth;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod guard;
pub mod market_data;
pub mod monitoring;
pub mod task;

// Re-export common types
pub use autopilot_types::{
    Action, Condition, ListedTrigger, Payload, PermitInfo, TaskEvent, TaskId, TaskStatus,
};

pub use engine::{
    AutopilotEngine,
    Clock,
    Collaborators,
    CycleOutcome,
    Dispatcher,
    DispatcherCommand,
    FixedClock,
    SystemClock,
};

pub use evaluator::{ConditionEvaluator, Evaluation};

pub use guard::{ActionGuard, GuardVerdict};

pub use task::{InMemoryTaskStore, TaskKey, TaskStore, TriggerTask};

pub use error::{
    AutopilotError,
    Result,
};
