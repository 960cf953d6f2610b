// src/core/tasks/mod.rs

//! Long-running background tasks that maintain the caches.

pub mod reaper;
