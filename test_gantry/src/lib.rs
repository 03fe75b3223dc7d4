//! End-to-end tests for the `gantry` crate live in the `tests` directory;
//! this library is intentionally empty.
