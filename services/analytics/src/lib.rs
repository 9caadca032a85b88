// Domain layer modules
pub mod domain;

// Application layer modules
pub mod application;

// Infrastructure layer modules
pub mod infrastructure;

// Lambda runtime wiring
pub mod runtime;
