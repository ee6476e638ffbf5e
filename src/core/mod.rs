pub mod event;
pub mod iocp;
pub mod net;
