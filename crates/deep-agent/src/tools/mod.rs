//! A set of built-in tools that models can use.

mod calculate;
mod time;
mod web_search;

pub use calculate::CalculateTool;
pub use time::CurrentTimeTool;
pub use web_search::{
    DuckDuckGo, SafeSearch, SearchError, SearchProvider, SearchQuery,
    SearchResult, SearchSettings, TimeLimit, WebSearchTool,
};
