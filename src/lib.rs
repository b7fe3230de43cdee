//! Manga page translation pipeline
//!
//! Sends manga pages to a Gemini image model for Korean translation and
//! horizontal typesetting, optionally has a second model judge each result,
//! and retries rejected pages with a raised temperature and the judge's
//! feedback until the retry budget runs out.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
