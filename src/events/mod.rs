pub mod bus;

pub use bus::{Event, EventBus, EventHandler, EventKind, FnHandler, HandlerFuture};
