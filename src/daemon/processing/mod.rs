//! Turns samples into sessions and tells subscribers about it.

pub mod notify;
pub mod tracker;
