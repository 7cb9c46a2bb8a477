pub mod concepts;
pub mod costs;
pub mod events;
pub mod prompts;
pub mod session;
