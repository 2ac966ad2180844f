pub mod types;
pub mod parser;
pub mod resolver;
pub mod dispatcher;
pub mod coordinator;
pub mod provider;

pub use types::{
    DeliveryOutcome, DeliverySummary, FailureKind, NotificationRequest, PipelineStage, Priority,
    PushMessage, RejectReason,
};
pub use dispatcher::PushDispatcher;
pub use coordinator::{CoordinatorOptions, DeliveryCoordinator};
