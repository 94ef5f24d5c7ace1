//! Challenge lifecycle: enrollment, onboarding DMs, end-of-challenge photo
//! collection, reminders, peer voting and results.

pub mod checkin;
pub mod config;
pub mod controller;
pub mod final_submission;
pub mod onboarding;
pub mod poses;
pub mod reminders;
pub mod voting;

pub use config::LifecycleConfig;
pub use controller::LifecycleController;
