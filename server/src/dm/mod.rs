pub mod conversations;
pub mod history;
pub mod message;
pub mod pipeline;
