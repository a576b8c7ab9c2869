pub mod driver;
pub mod metadata;
pub mod naming;
pub mod object;

#[cfg(test)]
mod tests;

pub use driver::BackupDriver;
pub use metadata::BackupMetadataApi;
pub use naming::BackupSnap;
pub use object::VolumeMetadataBackup;
