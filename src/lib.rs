//! MongoDB-backed catalog and CLI wiring for Mongoboot. The engine and
//! manifest model live in `mongoboot-core`.

pub mod mongo;
