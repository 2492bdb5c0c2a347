pub mod jsonrpc;
pub mod requests;

mod capabilities;
mod content;
mod implementation;
mod initialization;
mod logging;
mod tools;

pub use capabilities::*;
pub use content::*;
pub use implementation::*;
pub use initialization::*;
pub use jsonrpc::*;
pub use logging::*;
pub use requests::*;
pub use tools::*;
