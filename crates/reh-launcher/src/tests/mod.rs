//! Test suites for the launcher lifecycle.

mod lifecycle_behaviour;
mod support;
