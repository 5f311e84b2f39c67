pub mod context;
pub mod processor;
pub mod receiver;
pub mod record;
