//! IPAM control plane: NIC tags, networks, network pools, IP allocation,
//! and NICs, served over HTTP.

pub mod audit;
pub mod config;
pub mod events;
pub mod kv;
pub mod models;
pub mod overlay;
pub mod rest;
