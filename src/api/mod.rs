pub mod client;
pub mod mock;
pub mod normalize;
pub mod transport;
pub mod types;

pub use client::{path_segment, ApiClient};
pub use mock::MockTransport;
pub use normalize::{RawPage, ResponseNormalizer, ShapeMatcher};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport};
