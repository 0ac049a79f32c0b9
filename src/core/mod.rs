/// Aggregate download and install numbers, outdated device lists
pub mod compliance;
/// Install history, download log and per-device release visibility
pub mod device;
/// Draft, published and deprecated transitions
pub mod lifecycle;
/// Release records - create, read, list, edit, delete
pub mod release;
/// Who a release is aimed at
pub mod targeting;
/// Dotted version comparison
pub mod version;
