pub mod meta;
pub mod record;

pub use meta::{Cardinality, EntityMeta, FieldKind, FieldMeta, ValueKind, snake_case};
pub use record::{
    Actor, Attribution, ChangeKind, ExtraData, HistoricalRecord, NewRecord, Snapshot,
};
