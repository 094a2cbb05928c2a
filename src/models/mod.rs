pub mod enums;
pub mod job;
pub mod document;
pub mod snapshot;
pub mod claim;
pub mod analysis;

pub use enums::*;
pub use job::*;
pub use document::*;
pub use snapshot::*;
pub use claim::*;
pub use analysis::*;
