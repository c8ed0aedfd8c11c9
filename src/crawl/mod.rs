//! Multi-level crawl engine.
//!
//! A crawl is a chain of [`LevelController`]s, one per link-following level.
//! Each level fetches a page with a [`Session`], extracts [`Record`]s with its
//! [`Extractor`], and recurses into the next level once per record with a
//! forked session. Traversal is depth-first and sequential across siblings.
//!
//! [`Browse`] builds the chain and wires the default hooks: filtering on
//! `DIG_READY`, handing final-level records to a [`BrowseHandler`] on
//! `DIG_DONE`, progress logging on `DIG_OVER`, and error funneling on
//! `DIG_ERROR`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use harvester_core::crawl::{
//!     Browse, BrowseConfig, BrowseHandler, ExtractRules, Extractor, LevelMeta, Record, Session,
//! };
//! use harvester_core::download::ClientSettings;
//!
//! struct Print;
//!
//! #[async_trait]
//! impl BrowseHandler for Print {
//!     async fn on_data(&self, records: &[Record], _path: &[LevelMeta]) -> anyhow::Result<()> {
//!         for record in records {
//!             println!("{:?}", record.url());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! # async fn example(list: ExtractRules, detail: ExtractRules) -> anyhow::Result<()> {
//! let levels: Vec<Arc<dyn Extractor>> = vec![Arc::new(list), Arc::new(detail)];
//! let browse = Browse::new(levels, Arc::new(Print), BrowseConfig::default())?;
//! let session = Session::new(&ClientSettings::default())?;
//! browse.start(session, Record::from_url("https://example.com/list")).await?;
//! # Ok(())
//! # }
//! ```

mod browse;
mod cookies;
mod error;
mod extract;
mod hooks;
mod level;
mod record;
mod session;

pub use browse::{Browse, BrowseConfig, BrowseHandler};
pub use cookies::CookieJar;
pub use error::{CrawlError, ExtractError, FetchError, LinkError};
pub use extract::{ExtractRule, ExtractRules, Extractor, FieldSource};
pub use hooks::{DigEvent, DigHooks, HookBus, HookError};
pub use level::{DigOutcome, LevelController, LevelMeta, LevelStatus};
pub use record::Record;
pub use session::{Page, Session};
