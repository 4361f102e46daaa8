//! External image provider abstraction and implementations.

mod http;
mod simulator;
mod traits;

pub use http::HttpImageProvider;
pub use simulator::SimulatedProvider;
pub use traits::{ImageProvider, ProviderError, ProviderRequest, ProviderSubmission};
