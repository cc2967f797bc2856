pub mod file_handlers;
pub mod health_handlers;
pub mod identity;
pub mod trash_handlers;
