pub mod autotitle;
pub mod backend;
pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod message;
pub mod openai_backend;
pub mod orchestrator;
pub mod panes;
pub mod projector;
pub mod speech;
pub mod throttle;
