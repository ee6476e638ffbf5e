pub mod event;
pub mod event_loop;
pub mod poller;
pub mod registration;

pub use event::{Event, Token};
pub use event_loop::{EventHandler, Reactor};
pub use poller::Poller;
pub use registration::Registration;
