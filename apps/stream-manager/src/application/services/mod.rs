//! Application Services
//!
//! - `StreamRegistry`: connection and callback bookkeeping per stream kind
//! - `TickerManager`: trade streams with optional log sink
//! - `OrderbookManager`: level-2 streams mirrored into local books

pub mod orderbook;
pub mod registry;
pub mod ticker;

pub use orderbook::{OrderbookManager, OrderbookOptions};
pub use registry::{SharedCallbacks, StreamRegistry, StreamTarget};
pub use ticker::{TickerManager, TickerOptions};
