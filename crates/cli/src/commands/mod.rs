pub mod chat;
pub mod client;
pub mod dev;
pub mod gateway;
pub mod send;
pub mod stream;
pub mod worker;
