//! Core engine — the recurring buy loop and the components it drives.

pub mod budget;
pub mod canceller;
pub mod journal;
pub mod monitor;
pub mod placer;
pub mod scheduler;
