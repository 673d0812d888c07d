//! Owner-facing data model shared by the trigger engine and whatever API layer
//! sits in front of it.

pub mod events;
pub mod trigger;

pub use events::TaskEvent;
pub use trigger::{
    Action, CloseAction, Condition, LimitOrderCloseAction, ListedTrigger, Payload, PermitInfo,
    PriceCondition, RebalanceAction, ReinvestAction, TaskId, TaskStatus, TimeCondition,
    TokenAmountCondition,
};
