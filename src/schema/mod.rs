//! Shared data model for cost records
//!
//! Defines the dynamic record representation (the remote API declares its
//! own columns per response), the enriched record with lineage columns,
//! and the billing scope descriptor.

pub mod record;
pub mod scope;

pub use record::{
    CellValue, CostRecord, EnrichError, EnrichedRecord, COL_COST_DATE, COL_INGESTION_DATE,
    COL_INGESTION_TIMESTAMP, COL_SOURCE_SCOPE, COL_SOURCE_SCOPE_NAME, USAGE_DATE_COLUMNS,
};
pub use scope::ScopeDescriptor;
