//! Consultation persistence contract.

pub mod repository;
