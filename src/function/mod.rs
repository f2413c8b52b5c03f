//! Handlers: the contract user code implements, how they are found, and
//! how their completion is observed.

pub mod abi;
pub mod completion;
pub mod context;
pub mod dylib;
pub mod handler;
pub mod provider;
pub mod registry;

pub use completion::{invoke, Callback, Delivery, Outcome, OutcomeKind, Settlement};
pub use context::Context;
pub use dylib::DynamicLibraryProvider;
pub use handler::{Completion, DeferredValue, ErrorReport, Handler, HandlerError};
pub use provider::{HandlerLocator, HandlerProvider, HandlerResolver, ResolveError};
pub use registry::{HandlerRegistry, RegistryError};
