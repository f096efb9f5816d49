pub mod link;
pub mod link_access_log;
pub mod link_access_stats;
pub mod link_browser_stats;
pub mod link_device_stats;
pub mod link_first_visit;
pub mod link_goto;
pub mod link_locale_stats;
pub mod link_network_stats;
pub mod link_os_stats;

pub use link::Entity as LinkEntity;
pub use link_access_log::Entity as LinkAccessLogEntity;
pub use link_access_stats::Entity as LinkAccessStatsEntity;
pub use link_browser_stats::Entity as LinkBrowserStatsEntity;
pub use link_device_stats::Entity as LinkDeviceStatsEntity;
pub use link_first_visit::Entity as LinkFirstVisitEntity;
pub use link_goto::Entity as LinkGotoEntity;
pub use link_locale_stats::Entity as LinkLocaleStatsEntity;
pub use link_network_stats::Entity as LinkNetworkStatsEntity;
pub use link_os_stats::Entity as LinkOsStatsEntity;
