#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod endpoint;
mod ip_block;
pub mod policy;
pub mod query;
pub mod store;

pub use self::{
    endpoint::{Endpoint, EndpointQueryResponse, PolicyRef},
    ip_block::IpBlock,
    query::{EndpointQuerier, QueryError},
    store::{DiscoverWorkload, IndexName, IndexedStore, Record, StoreError},
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
