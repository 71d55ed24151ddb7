pub mod identifier;
pub mod migrator;
pub mod slug;
pub mod store;
pub mod unit;

pub use identifier::{TIMESTAMP_FORMAT, allocate};
pub use migrator::{ApplyReport, Migrator, RevertReport, UnitState, UnitStatus};
pub use slug::normalize;
pub use store::{MigrationDir, UNIT_EXTENSION, UnitRegistry, UnitSource};
pub use unit::{APPLY_MARKER, MigrationUnit, REVERT_MARKER, SqlUnit, UNIT_TEMPLATE};
