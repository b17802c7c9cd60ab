//! Referral-aware account ledger and subscription engine for a chat-bot
//! service.
//!
//! The [`AccountService`] facade is the external interface; underneath it
//! the domain services in [`domain`] enforce the account invariants against
//! the [`store::AccountStore`] persistence abstraction.

pub mod clock;
pub mod config;
pub mod domain;
pub mod models;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use domain::AccountError;
pub use models::{
    AccountRef, AccountStats, NewUser, PaymentOutcome, Transaction, UsageRecord, UsageStats, User,
    UserPatch,
};
pub use service::AccountService;
pub use store::{AccountStore, MemoryStore, PostgresStore};
