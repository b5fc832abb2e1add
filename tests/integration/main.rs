//! Integration tests for tradegate

mod automation_test;
mod bracket_test;
mod common;
mod engine_test;
mod risk_test;
