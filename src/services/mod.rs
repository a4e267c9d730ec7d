mod consumer;
mod producer;

pub use consumer::{ConsumerService, DeliveryOutcome, RejectReason};
pub use producer::{ProducerService, Publisher};
