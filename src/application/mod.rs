// Application layer: condition pipeline, authoring sessions, CQRS buses and handlers

pub mod coercion;
pub mod command_bus;
pub mod command_handlers;
pub mod commands;
pub mod events;
pub mod expander;
pub mod normalizer;
pub mod queries;
pub mod query_bus;
pub mod query_handlers;
pub mod serialization;
pub mod services;
pub mod session;
pub mod validators;
