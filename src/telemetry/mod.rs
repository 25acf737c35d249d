pub mod decoder;
pub mod history;

pub use decoder::{TelemetryDecoder, TemperatureUnit};
pub use history::HistoryBuffer;
