//! Climate onboarding: generates hotspots and quick wins for newly added
//! cities and reports progress while it works.

pub mod catalog;
pub mod city;
pub mod config;
pub mod content;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod store;
