//! End-to-end tests for the campus query bot live under `tests/`.
