/// Executor controllers and the worker-side execution context.
pub mod controller;
