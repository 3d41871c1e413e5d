//! Test support: mock transports and recording collaborators

pub mod mocks;
