//! Broker services: the state store, the backend client, the two
//! reconcilers with their retry and scheduling primitives, and the
//! provisioning façade.

pub mod backend;
pub mod deletion_reconciler;
pub mod director_client;
pub mod pool_reconciler;
pub mod provisioner;
pub mod resource_store;
pub mod retry;
pub mod scheduler;
