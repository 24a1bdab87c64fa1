//! Price history: query adapters and the alignment engine.

pub mod align;
pub mod influx;
pub mod query;
pub mod service;

pub use align::{align, Alignment, DenseHistory, LatestSnapshot};
pub use influx::InfluxPriceSource;
pub use query::{
    validate_tickers, AlignMode, PriceQuery, PriceSource, SeriesLocation, StaticPriceSource,
};
pub use service::PriceHistoryService;
