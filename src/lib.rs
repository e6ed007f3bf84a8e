//! # Accounting Reconcile
//!
//! A double-entry reconciliation library: journal entries, cascading tax
//! computation, matching of receivable and payable items, write-offs and
//! currency exchange differences.
//!
//! ## Features
//!
//! - **Journal entries**: balance validation, lock dates, posting with journal sequences
//! - **Taxes**: percent, fixed, division and group taxes, price-included or not,
//!   rounded per line or globally
//! - **Reconciliation**: partial and full matches across currencies, write-offs,
//!   exchange difference entries and unreconcile
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use accounting_reconcile::{EngineConfig, Ledger, MemoryStorage, RequestContext};
//! use chrono::NaiveDate;
//!
//! let ledger = Ledger::new(MemoryStorage::new(), EngineConfig::default());
//! let ctx = RequestContext::new("c1", NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
//! // ledger.setup_company(...), ledger.record(&ctx, draft), ledger.reconcile(&ctx, ...)
//! # let _ = (ledger, ctx);
//! ```

pub mod config;
pub mod currency;
pub mod ledger;
pub mod reconciliation;
pub mod tax;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use currency::{convert_amount, Currency, CurrencyRate};
pub use ledger::{
    AccountManager, Ledger, LedgerIntegrityReport, MoveBuilder, MoveDraft, MoveManager,
    RecordedMove, StandardChart, ValidityCheck,
};
pub use reconciliation::{
    MatchingField, ReconcileOptions, ReconciliationEngine, WriteoffCurrency, WriteoffParams,
};
pub use tax::{compute_all, ComputeAllParams, Tax, TaxAmountType, TaxComputation, TaxError};
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::MemoryStorage;
pub use utils::telemetry::init_tracing;

// Re-export entry patterns for convenience
pub use ledger::moves::patterns;
