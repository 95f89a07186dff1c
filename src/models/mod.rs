pub mod paper;
pub mod prompt_history;
pub mod question;
pub mod request;
pub mod resource;
