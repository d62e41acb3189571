//! Credit domain: customer credit records, the credit-worthiness policy
//! and the credit approval use case.

pub mod approval;
pub mod credit_data;
pub mod decision;

pub use approval::CreditApprovalService;
pub use credit_data::{
    CreditData, CreditError, CreditFilter, CreditRecord, CreditRecordPatch, CreditSummary,
    RiskBand,
};
pub use decision::CreditDecision;
