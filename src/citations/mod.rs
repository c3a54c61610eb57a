//! Legal citation integrity checks.
//!
//! Text is normalized, citations are extracted with their party-name
//! context, full case citations are verified against the authority (through
//! a 30-day cache), and the hard-stop rule decides whether the workflow may
//! continue.

pub mod authority;
pub mod decision;
pub mod extract;
pub mod normalize;
pub mod verify;

pub use authority::{AuthorityQuery, AuthorityRecord, CitationAuthority, CourtListenerAuthority, LookupStatus};
pub use decision::{HaltReason, HardStopDecision, VerificationStatus, VerifiedCitation, evaluate_hard_stop};
pub use extract::{CitationKind, ExtractedCitation, extract_citations};
pub use normalize::normalize;
pub use verify::{CitationPipeline, CitationReport, CitationSettings};
