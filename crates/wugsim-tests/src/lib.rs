//! Integration test crate for wugsim; see `tests/`.
