pub mod contigs;
pub mod interv;
pub mod partition;

pub use contigs::{ContigId, Contigs};
pub use interv::Interval;
pub use partition::{LoadProfile, RegionPartition};
