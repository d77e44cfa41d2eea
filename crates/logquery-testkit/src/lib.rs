//! # Logquery Testkit
//!
//! Testing utilities for logquery.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Record and request builders for one stream partition
//! - **Scripted storage**: A [`ScriptedStore`] whose lookups the test feeds
//!   by hand, to pin down interleavings
//! - **Generators**: Proptest strategies for refs and multi-node scenarios
//!
//! ## Test Fixtures
//!
//! ```rust
//! use logquery_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let records = fixture.records([(1, 0), (2, 0)]);
//! let request = fixture.range_request("q-1", (0, 0), (10, 0));
//! assert_eq!(records.len(), 2);
//! assert_eq!(request.partition, fixture.partition);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use logquery_testkit::generators::reconciliation_case;
//!
//! proptest! {
//!     #[test]
//!     fn union_is_sorted(case in reconciliation_case(3, 20)) {
//!         let union = case.union();
//!         prop_assert!(union.windows(2).all(|w| w[0] < w[1]));
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod scripted;

pub use fixtures::{refs_of, TestFixture};
pub use generators::{reconciliation_case, ReconciliationCase};
pub use scripted::ScriptedStore;
