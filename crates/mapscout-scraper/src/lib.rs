pub mod chromium;
pub mod consent;
pub mod detail;
pub mod error;
pub mod feed;
pub mod normalize;
pub mod orchestrator;
mod retry;
pub mod session;
pub mod view;
pub mod wait;

pub use chromium::{find_chrome, ChromiumBrowser, ChromiumSession, LaunchOptions};
pub use consent::{dismiss_consent, ConsentPolicy};
pub use detail::{capture_snapshot, extract_details, ListingSnapshot};
pub use error::{ScrapeError, SessionError};
pub use feed::{collect_references, scroll_to_exhaustion, FeedPolicy, ScrollPolicy};
pub use orchestrator::{Orchestrator, PipelineConfig};
pub use session::{BrowserSession, ContextId, Element, Scope, Selector};
pub use view::{extract_listing, ViewPolicy};
pub use wait::{Lookup, WaitPolicy};
