/// CLI command implementations

pub mod session;
