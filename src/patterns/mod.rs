//! The public interaction patterns, wiring sockets, queues, receive
//! loops, and the scheduler together.

mod publisher;
mod receiver;
mod requester;
mod responder;
mod service_queue_reader;
mod subscriber;

pub use publisher::Publisher;
pub use requester::Requester;
pub use responder::Responder;
pub use service_queue_reader::ServiceQueueReader;
pub use subscriber::Subscriber;
