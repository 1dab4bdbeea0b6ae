//! End-to-end scenarios for the controller core live in `tests/`.
//! They drive the real subsystems against an in-process fake driver.
