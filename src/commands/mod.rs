pub mod invoke;

pub use invoke::{invoke, InvokeData, InvokeResult, Operation, Parameters};
