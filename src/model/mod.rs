pub mod entry;
pub mod policy;
pub mod validation;

pub use entry::{Label, PolicyEntry, Resource, ResourceKey, Resources, Subject, SubjectId, Subjects};
pub use policy::{Entries, Lifecycle, Policy, PolicyId};
