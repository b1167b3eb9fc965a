//! Shared test utilities for csr-db unit tests.
