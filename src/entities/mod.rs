//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod device;
pub mod device_update_history;
pub mod distributor;
pub mod product;
pub mod release;
pub mod release_device_target;
pub mod release_distributor_target;
pub mod release_download;

// Re-export specific types to avoid conflicts
pub use device::{Column as DeviceColumn, Entity as Device, Model as DeviceModel};
pub use device_update_history::{
    Column as DeviceUpdateHistoryColumn, Entity as DeviceUpdateHistory, InstallStatus,
    Model as DeviceUpdateHistoryModel,
};
pub use distributor::{Column as DistributorColumn, Entity as Distributor, Model as DistributorModel};
pub use product::{Column as ProductColumn, Entity as Product, Model as ProductModel};
pub use release::{
    Column as ReleaseColumn, Entity as Release, Model as ReleaseModel, ReleaseStatus,
    ReleaseType, TargetType,
};
pub use release_device_target::{Entity as ReleaseDeviceTarget, Model as ReleaseDeviceTargetModel};
pub use release_distributor_target::{
    Entity as ReleaseDistributorTarget, Model as ReleaseDistributorTargetModel,
};
pub use release_download::{Entity as ReleaseDownload, Model as ReleaseDownloadModel};
