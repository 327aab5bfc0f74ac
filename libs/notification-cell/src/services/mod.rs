pub mod dispatcher;
pub mod queue;
pub mod templates;
pub mod worker;

pub use dispatcher::NotificationDispatcher;
pub use queue::NotificationQueueService;
pub use worker::DispatchWorker;
