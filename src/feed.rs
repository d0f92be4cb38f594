// Bulk daily feed normalization
//
// The feed is CSV with an optional block of station metadata before the
// real header row. `header` locates and maps the columns, `daily_parser`
// turns the data rows into observations.

pub mod daily_parser;
pub mod header;

pub use daily_parser::{DailyFeedParser, FeedParseError, ParseStats, SkipReason};
pub use header::ColumnMap;
