//! Protocol engines: the reliable send path, fragment reassembly, and
//! the synchronous endpoint that dispatches inbound packets.

mod endpoint;
mod reassembly;
mod send;

pub use endpoint::{Dispatch, SessionEndpoint};
pub use reassembly::{FragmentResult, ReassemblyEngine};
pub use send::{PendingTransmission, SendEngine};
