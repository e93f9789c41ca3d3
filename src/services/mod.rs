//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own presence, authorization, identity and attention
//! bookkeeping so route handlers can stay focused on protocol translation.

pub mod attention;
pub mod gate;
pub mod identity;
pub mod lifecycle;
pub mod presence;
