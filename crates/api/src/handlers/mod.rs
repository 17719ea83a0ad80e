//! Request handlers for the three public surfaces.
//!
//! `service` dispatches controller scripts, `source` is the admin CRUD +
//! EVAL surface, `resource` serves stored static content. Handlers
//! delegate storage to `plinth_db` repositories and execution to
//! `plinth_runtime`, mapping errors via [`crate::error::AppError`].

pub mod health;
pub mod resource;
pub mod service;
pub mod source;
