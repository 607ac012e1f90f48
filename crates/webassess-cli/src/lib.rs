pub mod assess;
pub mod fetch;
pub mod logging;
pub mod output;
pub mod progress;

pub use assess::{AssessOptions, UrlAssessor};
pub use fetch::{build_fetch_client, fetch_target, parse_target};
pub use logging::{init_logging, LogHandle};
pub use output::{render_report, write_report, OutputFormat, Signal};
pub use progress::PullProgress;
