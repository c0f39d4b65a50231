//! Ledger & risk engine: account ledger, AML screening, loan underwriting
//! and scheduled settlement over a single SQLite store.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod limits;
pub mod model;
pub mod requests;
pub mod sink;
pub mod store;
pub mod types;

pub mod compliance_subsystem;
pub mod ledger_subsystem;
pub mod loan_risk_subsystem;
pub mod settlement_subsystem;
