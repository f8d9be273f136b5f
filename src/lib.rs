//! vitalflow - real-time vital signs monitoring core

pub mod pipeline;
