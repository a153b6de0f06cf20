//! Integration tests for nft-lender

mod cycle_test;
mod scenario_test;
