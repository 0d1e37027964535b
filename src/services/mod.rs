//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and fan-out.

pub mod chat;
pub mod hub;
pub mod poll;
pub mod room;
pub mod ticker;
pub mod user;
