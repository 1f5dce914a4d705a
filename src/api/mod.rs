pub mod binance;
pub mod fetcher;
pub mod validator;

pub use binance::BinanceKlinesClient;
pub use fetcher::{FetchError, Fetcher};
pub use validator::CandleValidator;
