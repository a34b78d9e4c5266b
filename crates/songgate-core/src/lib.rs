//! Core types and policy for songgate.
//!
//! songgate decides whether a song generation is free or must be paid for,
//! and keeps the books that decision relies on:
//!
//! - **Identifiers**: `AccountId`, `GuestId`, `TransactionId`, `GenerationId`
//! - **Identities**: `Identity`, `LedgerKey`, `RequestIdentity`
//! - **Ledger**: `UsageLedgerEntry`, `QuotaStatus`, `RecordOutcome`
//! - **Credits**: `PaymentCredit`, `ConsumeOutcome`
//! - **Ground truth**: `GenerationRecord`, `Funding`
//! - **Merge / reconcile**: the pure arithmetic every store backend shares
//!
//! # Free quota
//!
//! Each identity gets exactly one free generation for its lifetime
//! ([`FREE_GENERATIONS_PER_IDENTITY`]). Every further generation needs a
//! purchased credit, and each purchase grants one single-use credit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod credit;
pub mod error;
pub mod generation;
pub mod identity;
pub mod ids;
pub mod ledger;
pub mod merge;
pub mod reconcile;

pub use credit::{ConsumeOutcome, PaymentCredit, CREDITS_PER_TRANSACTION};
pub use error::{LedgerError, Result};
pub use generation::{Funding, GenerationRecord};
pub use identity::{Identity, LedgerKey, RequestIdentity};
pub use ids::{AccountId, GenerationId, GuestId, IdError, TransactionId};
pub use ledger::{QuotaStatus, RecordOutcome, UsageLedgerEntry, FREE_GENERATIONS_PER_IDENTITY};
pub use merge::MergeResult;
pub use reconcile::{ReconcileReport, SweepSummary};
