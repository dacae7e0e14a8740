pub mod opa_client;

pub use opa_client::{build_opa_input, OpaClient, OpaError, OpaResult};
