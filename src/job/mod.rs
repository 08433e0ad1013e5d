//! The two ingestion jobs. Each is stateless between invocations; the only
//! thing they share is the hosted database they append to.

pub mod player_count;
pub mod stream_ingest;
