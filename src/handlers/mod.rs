pub mod health_handlers;
pub mod instance_handlers;
