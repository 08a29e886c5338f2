//! rotor - parallel Tor worker pool with a SOCKS-aware HTTP load balancer
//!
//! Library surface shared by the `rotor` binary and the integration tests
//! under `tests/`, which drive the pool and load balancer against an
//! in-process stub SOCKS5 worker instead of a real Tor binary.

pub mod backend_pool;
pub mod check;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod exit_distributor;
pub mod health_monitor;
pub mod integrator;
pub mod load_balancer;
pub mod logging;
pub mod operator_message;
pub mod parallel_runner;
pub mod pool_manager;
pub mod port_allocator;
pub mod relay_directory;
pub mod socks5;
pub mod worker_config;
pub mod worker_process;
