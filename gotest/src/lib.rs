//! Go test discovery and execution.
//!
//! Test files are matched with tree-sitter queries and folded into a tree of
//! packages, files, suites, tests, subtests and table cases. Any node can be
//! turned into a `go test -run` invocation whose `-json` event stream is
//! mapped back onto the tree.
//!
//! - **[`core`]**: Pure, deterministic logic (matching, tree building,
//!   patterns, event correlation, diagnostics, aggregation).
//! - **[`io`]**: Side-effecting operations (configuration, discovery, the
//!   test process, reports).
//!
//! [`project`] and [`session`] join the two.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod project;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
