//! The `client` module talks to the broker's management HTTP API.
//!
//! It provides `ManagementClient`, which lists the broker's client
//! connections and force-closes the ones belonging to a given user, and the
//! `ConnectionRecord` and `CloseReport` types it works with.

pub mod management_client;
pub mod record;

pub use management_client::{
    MANAGEMENT_PORT, ManagementClient, management_api_url, matching_connection_names,
};
pub use record::{CloseReport, ConnectionRecord};
