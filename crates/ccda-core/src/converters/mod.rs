//! Built-in converters, one per target record kind
//!
//! Organization and Patient are primary converters run before everything
//! else. The remaining section converters select their source nodes from the
//! document and run in registration order. Location is only reached from
//! procedures.

mod allergy;
mod condition;
mod location;
mod observation;
mod organization;
mod patient;
mod practitioner;
mod procedure;
pub mod shared;

pub use allergy::AllergyConverter;
pub use condition::ConditionConverter;
pub use location::LocationConverter;
pub use observation::{ObservationConverter, RESULT_VALUE_TYPES};
pub use organization::OrganizationConverter;
pub use patient::PatientConverter;
pub use practitioner::PractitionerConverter;
pub use procedure::ProcedureConverter;
